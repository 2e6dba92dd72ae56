//! Wire models for the two WebSocket protocols this crate speaks:
//! the control-plane gateway ([`gateway`]) and voice signaling ([`voice`]).
//!
//! Both follow Discord's `{"op": <int>, "d": <payload>}` envelope, so each
//! submodule hand-writes `Serialize`/`Deserialize` keyed on the opcode
//! rather than leaning on `#[serde(tag = "op")]`, which cannot express an
//! integer tag whose payload shape depends on its value.

#[cfg(feature = "gateway")]
pub mod gateway;
#[cfg(feature = "driver")]
pub mod voice;
