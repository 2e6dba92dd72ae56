#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! `resonant-voice` is an async Discord voice connection library: a
//! control-plane gateway state machine (`"gateway"` feature) and a voice
//! data-plane driver (`"driver"` feature) that carries a handshake through
//! to encrypted RTP send, with neither requiring the other.
//!
//! ## Features
//!  * `"gateway"` -- the control-plane WebSocket: identify/resume,
//!    heartbeating, and dispatch scanning for `VOICE_STATE_UPDATE`/
//!    `VOICE_SERVER_UPDATE`.
//!  * `"driver"` -- the voice data-plane: signaling handshake, UDP IP
//!    discovery, RTP framing/encryption, audio pacing, and the
//!    [`voice::VoiceConnectionSupervisor`] that ties the two control-plane
//!    events and the handshake into a single `connected` state.
//!  * `"rustls"`/`"native"` -- mutually exclusive TLS backends for the
//!    WebSocket transport; `"rustls"` is on by default.
//!
//! Either feature can be used without the other: a caller with its own
//! gateway shard only needs `"driver"` plus an implementation of
//! [`control::ControlPlaneSender`]; a caller that only wants to observe
//! voice-channel membership only needs `"gateway"`.
//!
//! ## Intents
//! Driving voice connections requires the `GUILD_VOICE_STATES` gateway
//! intent.

#![warn(clippy::pedantic, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_link_with_quotes
)]

mod config;
pub mod constants;
pub mod control;
pub mod error;
#[cfg(feature = "gateway")]
pub mod gateway;
pub mod id;
pub mod model;
#[cfg(feature = "driver")]
pub mod opus;
#[cfg(feature = "driver")]
pub mod voice;
#[cfg(any(feature = "gateway", feature = "driver"))]
mod ws;

pub use config::SupervisorConfig;
