//! The voice data-plane: signaling handshake, UDP IP discovery, RTP framing
//! and encryption, audio pacing, and the connection-flow supervisor that
//! ties them all together.

mod backoff;
pub mod connection;
pub mod crypto;
pub mod pacer;
pub mod rtp;
pub mod signaling;
pub mod socket_reader;
pub mod supervisor;
pub mod udp;

pub use pacer::{AudioPacer, PacerSource};
pub use rtp::{RtpPacketizer, RtpSendState};
pub use socket_reader::SocketReader;
pub use supervisor::{ConnectionFlowState, VoiceConnectionSupervisor, VoiceSender};
