//! Newtypes around Discord snowflake IDs.
//!
//! Discord sends snowflakes as JSON strings to dodge `f64`/`i53` precision
//! loss in other languages' clients, so `Deserialize`/`Serialize` here go
//! through a string, not the integer Discord's docs otherwise imply.

use serde::{
    de::{Deserializer, Error as DeError},
    Deserialize,
    Serialize,
    Serializer,
};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::NonZeroU64,
    str::FromStr,
};

macro_rules! impl_id_serde {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                NonZeroU64::from_str(&raw)
                    .map(Self)
                    .map_err(|e| DeError::custom(format!("invalid snowflake {raw:?}: {e}")))
            }
        }
    };
}

/// ID of a Discord voice/text channel.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ChannelId(pub NonZeroU64);

/// ID of a Discord guild (colloquially, "server").
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct GuildId(pub NonZeroU64);

/// ID of a Discord user.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct UserId(pub NonZeroU64);

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

impl From<NonZeroU64> for ChannelId {
    fn from(id: NonZeroU64) -> Self {
        Self(id)
    }
}

impl Display for GuildId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

impl From<NonZeroU64> for GuildId {
    fn from(id: NonZeroU64) -> Self {
        Self(id)
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

impl From<NonZeroU64> for UserId {
    fn from(id: NonZeroU64) -> Self {
        Self(id)
    }
}

impl_id_serde!(ChannelId);
impl_id_serde!(GuildId);
impl_id_serde!(UserId);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_matches_inner_value() {
        let id = GuildId(NonZeroU64::new(12345).unwrap());
        assert_eq!(id.to_string(), "12345");
    }

    #[test]
    fn snowflakes_round_trip_through_json_strings() {
        let id = UserId(NonZeroU64::new(80351110224678912).unwrap());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"80351110224678912\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
