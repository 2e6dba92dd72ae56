//! Payload and opcode types for Discord's main (control-plane) gateway.
#![allow(missing_docs)]

use crate::id::{ChannelId, GuildId, UserId};

use serde::{
    de::Error as DeError,
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use serde_json::value::RawValue;
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Integer opcode discriminant used by the Discord gateway.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum OpCode {
    /// An event was dispatched.
    Dispatch = 0,
    /// Fired periodically by the client to keep the connection alive.
    Heartbeat = 1,
    /// Starts a new session.
    Identify = 2,
    /// Updates the client's presence.
    PresenceUpdate = 3,
    /// Used to join/move/leave voice channels.
    VoiceStateUpdate = 4,
    /// Undocumented, retained for opcode-table completeness.
    VoicePing = 5,
    /// Resumes a dropped gateway session.
    Resume = 6,
    /// Indicates that the client should reconnect and resume immediately.
    Reconnect = 7,
    /// Requests information about offline guild members in a large guild.
    RequestGuildMembers = 8,
    /// Indicates that the session has been invalidated; the client should
    /// reconnect and identify/resume accordingly.
    InvalidateSession = 9,
    /// Sent as the first event after connecting, with the heartbeat interval.
    Hello = 10,
    /// Sent in response to a heartbeat.
    HeartbeatAck = 11,
    /// Undocumented, retained for opcode-table completeness.
    GuildSync = 12,
}

/// Payload for [`OpCode::Hello`].
#[derive(Clone, Debug, Deserialize)]
pub struct Hello {
    /// Interval, in milliseconds, on which the client should heartbeat.
    pub heartbeat_interval: f64,
}

/// `$os`/`$browser`/`$device` identification properties.
#[derive(Clone, Debug, Serialize)]
pub struct IdentifyProperties {
    #[serde(rename = "$os")]
    pub os: String,
    #[serde(rename = "$browser")]
    pub browser: String,
    #[serde(rename = "$device")]
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            browser: env!("CARGO_PKG_NAME").to_owned(),
            device: env!("CARGO_PKG_NAME").to_owned(),
        }
    }
}

/// Sharding info for [`Identify::shard`], `[shard_id, num_shards]`.
pub type ShardInfo = [u32; 2];

/// Payload for [`OpCode::Identify`].
#[derive(Clone, Debug, Serialize)]
pub struct Identify {
    pub token: String,
    pub properties: IdentifyProperties,
    /// Whether the gateway should compress dispatch payloads.
    pub compress: bool,
    /// Guild member count above which `GUILD_CREATE`s arrive without
    /// offline members.
    pub large_threshold: u8,
    pub intents: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<serde_json::Value>,
}

/// Payload for [`OpCode::Resume`].
#[derive(Clone, Debug, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// Payload for an outbound [`OpCode::VoiceStateUpdate`].
#[derive(Clone, Debug, Serialize)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    pub channel_id: Option<ChannelId>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// Inbound `VOICE_STATE_UPDATE` dispatch payload, trimmed to the fields the
/// voice connection supervisor actually consumes.
#[derive(Clone, Debug, Deserialize)]
pub struct VoiceStateUpdateEvent {
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<ChannelId>,
    pub user_id: UserId,
    pub session_id: String,
}

/// Inbound `VOICE_SERVER_UPDATE` dispatch payload.
#[derive(Clone, Debug, Deserialize)]
pub struct VoiceServerUpdateEvent {
    pub token: String,
    pub guild_id: GuildId,
    pub endpoint: Option<String>,
}

/// The set of dispatch events this crate understands by name. Any other `t`
/// is preserved as [`DispatchEvent::Other`] with its raw JSON so that
/// `wait_for` listeners can still route on event names this crate doesn't
/// otherwise parse.
#[derive(Clone, Debug)]
pub enum DispatchEvent {
    Ready,
    Resumed,
    VoiceStateUpdate(Box<VoiceStateUpdateEvent>),
    VoiceServerUpdate(Box<VoiceServerUpdateEvent>),
    Other(String, Box<serde_json::Value>),
}

impl DispatchEvent {
    /// The `t` name Discord used for this event, for `wait_for` matching.
    pub fn name(&self) -> &str {
        match self {
            DispatchEvent::Ready => "READY",
            DispatchEvent::Resumed => "RESUMED",
            DispatchEvent::VoiceStateUpdate(_) => "VOICE_STATE_UPDATE",
            DispatchEvent::VoiceServerUpdate(_) => "VOICE_SERVER_UPDATE",
            DispatchEvent::Other(name, _) => name,
        }
    }
}

/// A single event received over the gateway WebSocket.
#[derive(Clone, Debug)]
pub enum GatewayEvent {
    Dispatch(u64, DispatchEvent),
    Heartbeat(Option<u64>),
    Reconnect,
    InvalidateSession(bool),
    Hello(Hello),
    HeartbeatAck,
}

#[derive(Deserialize)]
struct RawEvent<'a> {
    op: u8,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
    #[serde(borrow, default)]
    d: Option<&'a RawValue>,
}

impl<'de> Deserialize<'de> for GatewayEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawEvent::deserialize(deserializer)?;

        Ok(match raw.op {
            0 => {
                let seq = raw.s.ok_or_else(|| DeError::missing_field("s"))?;
                let t = raw.t.ok_or_else(|| DeError::missing_field("t"))?;
                let d = raw.d.ok_or_else(|| DeError::missing_field("d"))?;
                let dispatch = match t.as_str() {
                    "READY" => DispatchEvent::Ready,
                    "RESUMED" => DispatchEvent::Resumed,
                    "VOICE_STATE_UPDATE" => DispatchEvent::VoiceStateUpdate(Box::new(
                        serde_json::from_str(d.get()).map_err(DeError::custom)?,
                    )),
                    "VOICE_SERVER_UPDATE" => DispatchEvent::VoiceServerUpdate(Box::new(
                        serde_json::from_str(d.get()).map_err(DeError::custom)?,
                    )),
                    other => DispatchEvent::Other(
                        other.to_owned(),
                        Box::new(serde_json::from_str(d.get()).map_err(DeError::custom)?),
                    ),
                };
                GatewayEvent::Dispatch(seq, dispatch)
            },
            1 => GatewayEvent::Heartbeat(
                raw.d
                    .map(|v| serde_json::from_str(v.get()))
                    .transpose()
                    .map_err(DeError::custom)?,
            ),
            7 => GatewayEvent::Reconnect,
            9 => {
                let invalidate = raw
                    .d
                    .map(|v| serde_json::from_str::<bool>(v.get()))
                    .transpose()
                    .map_err(DeError::custom)?
                    .unwrap_or(false);
                GatewayEvent::InvalidateSession(invalidate)
            },
            10 => {
                let d = raw.d.ok_or_else(|| DeError::missing_field("d"))?;
                GatewayEvent::Hello(serde_json::from_str(d.get()).map_err(DeError::custom)?)
            },
            11 => GatewayEvent::HeartbeatAck,
            op => return Err(DeError::custom(format!("unsupported gateway opcode {op}"))),
        })
    }
}

/// A command this client sends over the gateway WebSocket.
#[derive(Clone, Debug)]
pub enum GatewayCommand {
    Heartbeat(Option<u64>),
    Identify(Identify),
    VoiceStateUpdate(VoiceStateUpdate),
    Resume(Resume),
}

impl Serialize for GatewayCommand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            GatewayCommand::Heartbeat(seq) => {
                map.serialize_entry("op", &(OpCode::Heartbeat as u8))?;
                map.serialize_entry("d", seq)?;
            },
            GatewayCommand::Identify(id) => {
                map.serialize_entry("op", &(OpCode::Identify as u8))?;
                map.serialize_entry("d", id)?;
            },
            GatewayCommand::VoiceStateUpdate(vsu) => {
                map.serialize_entry("op", &(OpCode::VoiceStateUpdate as u8))?;
                map.serialize_entry("d", vsu)?;
            },
            GatewayCommand::Resume(r) => {
                map.serialize_entry("op", &(OpCode::Resume as u8))?;
                map.serialize_entry("d", r)?;
            },
        }
        map.end()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hello_round_trips() {
        let raw = r#"{"op":10,"d":{"heartbeat_interval":41250.0}}"#;
        let event: GatewayEvent = serde_json::from_str(raw).unwrap();
        match event {
            GatewayEvent::Hello(h) => assert_eq!(h.heartbeat_interval, 41250.0),
            other => panic!("expected Hello, got {other:?}"),
        }
    }

    #[test]
    fn dispatch_preserves_unknown_event_names() {
        let raw = r#"{"op":0,"s":5,"t":"MESSAGE_CREATE","d":{"foo":"bar"}}"#;
        let event: GatewayEvent = serde_json::from_str(raw).unwrap();
        match event {
            GatewayEvent::Dispatch(seq, DispatchEvent::Other(name, _)) => {
                assert_eq!(seq, 5);
                assert_eq!(name, "MESSAGE_CREATE");
            },
            other => panic!("expected Dispatch/Other, got {other:?}"),
        }
    }

    #[test]
    fn heartbeat_command_serializes_with_integer_op() {
        let cmd = GatewayCommand::Heartbeat(Some(5));
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["op"], 1);
        assert_eq!(json["d"], 5);
    }
}
