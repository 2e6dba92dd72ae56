//! Crate-wide error re-exports.
//!
//! Each subsystem owns its own error enum (`gateway::Error`,
//! `voice::connection::Error`, `voice::udp::Error`) rather than funnelling
//! everything through one blanket type; this module just re-exports them
//! under short, discoverable names.

#[cfg(feature = "gateway")]
pub use crate::gateway::Error as GatewayError;

#[cfg(feature = "driver")]
pub use crate::voice::{connection::Error as VoiceConnectionError, udp::Error as UdpDiscoveryError};
