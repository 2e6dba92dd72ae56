//! Payload and opcode types for Discord's voice signaling WebSocket.
#![allow(missing_docs)]

use crate::id::{GuildId, UserId};

use serde::{
    de::Error as DeError,
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use serde_json::value::RawValue;
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Integer opcode discriminant used by the Discord voice gateway.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum OpCode {
    Identify = 0,
    SelectProtocol = 1,
    Ready = 2,
    Heartbeat = 3,
    SessionDescription = 4,
    Speaking = 5,
    HeartbeatAck = 6,
    Resume = 7,
    Hello = 8,
    InvalidateSession = 9,
}

/// Payload for an outbound [`OpCode::Identify`].
#[derive(Clone, Debug, Serialize)]
pub struct Identify {
    pub server_id: GuildId,
    pub user_id: UserId,
    pub session_id: String,
    pub token: String,
}

/// `protocol`/`data` payload for an outbound [`OpCode::SelectProtocol`].
#[derive(Clone, Debug, Serialize)]
pub struct SelectProtocol {
    pub protocol: &'static str,
    pub data: SelectProtocolData,
}

#[derive(Clone, Debug, Serialize)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: &'static str,
}

/// Payload for an inbound [`OpCode::Ready`].
#[derive(Clone, Debug, Deserialize)]
pub struct Ready {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    pub modes: Vec<String>,
}

/// Payload for an inbound [`OpCode::SessionDescription`].
#[derive(Clone, Debug, Deserialize)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: Vec<u8>,
}

/// Payload for an outbound (and mirrored inbound) [`OpCode::Speaking`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Speaking {
    pub speaking: u8,
    pub delay: u64,
    pub ssrc: u32,
}

/// Payload for [`OpCode::Hello`].
#[derive(Clone, Debug, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: f64,
}

/// Payload for an outbound [`OpCode::Resume`].
#[derive(Clone, Debug, Serialize)]
pub struct Resume {
    pub server_id: GuildId,
    pub session_id: String,
    pub token: String,
}

/// A single event received over the voice signaling WebSocket.
#[derive(Clone, Debug)]
pub enum VoiceEvent {
    Ready(Ready),
    SessionDescription(SessionDescription),
    Speaking(Speaking),
    HeartbeatAck(u64),
    Hello(Hello),
    InvalidateSession,
}

#[derive(Deserialize)]
struct RawEvent<'a> {
    op: u8,
    #[serde(borrow, default)]
    d: Option<&'a RawValue>,
}

impl<'de> Deserialize<'de> for VoiceEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawEvent::deserialize(deserializer)?;
        let d = || raw.d.ok_or_else(|| DeError::missing_field("d"));

        Ok(match raw.op {
            2 => VoiceEvent::Ready(serde_json::from_str(d()?.get()).map_err(DeError::custom)?),
            4 => VoiceEvent::SessionDescription(
                serde_json::from_str(d()?.get()).map_err(DeError::custom)?,
            ),
            5 => VoiceEvent::Speaking(serde_json::from_str(d()?.get()).map_err(DeError::custom)?),
            6 => {
                let nonce: u64 = serde_json::from_str(d()?.get()).map_err(DeError::custom)?;
                VoiceEvent::HeartbeatAck(nonce)
            },
            8 => VoiceEvent::Hello(serde_json::from_str(d()?.get()).map_err(DeError::custom)?),
            9 => VoiceEvent::InvalidateSession,
            op => return Err(DeError::custom(format!("unsupported voice opcode {op}"))),
        })
    }
}

/// A command this client sends over the voice signaling WebSocket.
#[derive(Clone, Debug)]
pub enum VoiceCommand {
    Identify(Identify),
    SelectProtocol(SelectProtocol),
    Heartbeat(u64),
    Speaking(Speaking),
    Resume(Resume),
}

impl Serialize for VoiceCommand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            VoiceCommand::Identify(id) => {
                map.serialize_entry("op", &(OpCode::Identify as u8))?;
                map.serialize_entry("d", id)?;
            },
            VoiceCommand::SelectProtocol(sp) => {
                map.serialize_entry("op", &(OpCode::SelectProtocol as u8))?;
                map.serialize_entry("d", sp)?;
            },
            VoiceCommand::Heartbeat(nonce) => {
                map.serialize_entry("op", &(OpCode::Heartbeat as u8))?;
                map.serialize_entry("d", nonce)?;
            },
            VoiceCommand::Speaking(s) => {
                map.serialize_entry("op", &(OpCode::Speaking as u8))?;
                map.serialize_entry("d", s)?;
            },
            VoiceCommand::Resume(r) => {
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
    fn ready_parses_modes_list() {
        let raw = r#"{"op":2,"d":{"ssrc":1,"ip":"127.0.0.1","port":1234,"modes":["xsalsa20_poly1305"]}}"#;
        let event: VoiceEvent = serde_json::from_str(raw).unwrap();
        match event {
            VoiceEvent::Ready(r) => {
                assert_eq!(r.ssrc, 1);
                assert_eq!(r.modes, vec!["xsalsa20_poly1305".to_owned()]);
            },
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn heartbeat_command_echoes_nonce() {
        let cmd = VoiceCommand::Heartbeat(42);
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["op"], 3);
        assert_eq!(json["d"], 42);
    }
}
