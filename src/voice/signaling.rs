//! The voice signaling state machine: identify/resume and heartbeating over
//! the per-guild voice WebSocket (distinct from the control-plane gateway).
//!
//! Grounded on `DiscordVoiceWebSocket` in discord.py's `gateway.py`: same
//! opcode table, same heartbeat-with-millisecond-nonce shape, same
//! `poll_event` 30-second timeout.

use crate::{
    gateway::heartbeat::HeartbeatDriver,
    model::voice::{Hello, Identify, Ready, Resume, SessionDescription, VoiceCommand, VoiceEvent},
    ws::{self, ReceiverExt, SenderExt, WsStream},
};

use async_tungstenite::tungstenite::Message;
use flume::Receiver;
use futures::stream::{SplitSink, SplitStream};
use futures::StreamExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};
use url::Url;

/// Integer close code sent by Discord when it closes the voice socket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VoiceCloseCode(pub u16);

impl VoiceCloseCode {
    const NON_RESUMABLE: [u16; 4] = [4004, 4006, 4009, 4014];

    /// Whether the client should attempt `RESUME` rather than a fresh
    /// `IDENTIFY` after this close. `4014` (disconnected/moved) is
    /// deliberately non-resumable: the supervisor treats it as an external
    /// disconnect, not a transient failure.
    pub fn is_resumable(self) -> bool {
        self.0 != 1000 && !Self::NON_RESUMABLE.contains(&self.0)
    }
}

/// Outcome of a single [`VoiceSignalingStateMachine::poll_event`] call.
#[derive(Debug)]
#[allow(missing_docs)]
pub enum PollOutcome {
    Ready(Ready),
    SessionDescription(SessionDescription),
    Speaking { ssrc: u32, speaking: bool },
    Heartbeat,
    SessionInvalidated,
    /// The socket closed; `resumable` is [`VoiceCloseCode::is_resumable`]
    /// applied to `code` (defaulting to `true` when Discord sent no code).
    ConnectionClosed { code: Option<u16>, resumable: bool },
    Timeout,
}

/// The per-guild voice signaling WebSocket and its heartbeat task.
pub struct VoiceSignalingStateMachine {
    server_id: crate::id::GuildId,
    user_id: crate::id::UserId,
    session_id: String,
    token: String,
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    heartbeat: HeartbeatDriver,
    heartbeat_rx: Receiver<VoiceCommand>,
    dead_rx: Receiver<()>,
}

impl VoiceSignalingStateMachine {
    /// Connects to `endpoint`, awaits `HELLO`, starts heartbeating, and
    /// sends either `IDENTIFY` or (if `resume` is set) `RESUME`.
    ///
    /// `resume` only ever governs which opcode opens the socket: this crate
    /// always re-runs the full `READY` → discovery → `SELECT_PROTOCOL` →
    /// `SESSION_DESCRIPTION` cycle afterwards regardless, since nothing in
    /// the retrieved corpus pins down a shorter resume sequence for the
    /// voice gateway specifically.
    #[instrument(skip(token, session_id))]
    pub async fn connect(
        endpoint: &str,
        server_id: crate::id::GuildId,
        user_id: crate::id::UserId,
        session_id: String,
        token: String,
        resume: bool,
    ) -> ws::Result<Self> {
        let url = generate_url(endpoint)?;
        let ws = connect_client(url).await?;
        let (mut sink, mut stream) = ws.split();

        let hello: Hello = loop {
            match stream.recv_json_no_timeout::<VoiceEvent>().await? {
                Some(VoiceEvent::Hello(h)) => break h,
                Some(_) | None => continue,
            }
        };

        let (heartbeat_tx, heartbeat_rx) = flume::unbounded();
        let (dead_tx, dead_rx) = flume::unbounded();
        let heartbeat = HeartbeatDriver::start(
            Duration::from_secs_f64(hello.heartbeat_interval / 1000.0),
            || VoiceCommand::Heartbeat(unix_millis()),
            heartbeat_tx,
            dead_tx,
        );

        let mut this = Self {
            server_id,
            user_id,
            session_id,
            token,
            sink,
            stream,
            heartbeat,
            heartbeat_rx,
            dead_rx,
        };

        if resume {
            this.resume().await?;
        } else {
            this.identify().await?;
        }

        Ok(this)
    }

    /// Sends `IDENTIFY` over the (already-connected) socket.
    async fn identify(&mut self) -> ws::Result<()> {
        self.sink
            .send_json(&VoiceCommand::Identify(Identify {
                server_id: self.server_id,
                user_id: self.user_id,
                session_id: self.session_id.clone(),
                token: self.token.clone(),
            }))
            .await
    }

    /// Sends `RESUME` over an existing socket after a reconnect.
    pub async fn resume(&mut self) -> ws::Result<()> {
        self.sink
            .send_json(&crate::model::voice::VoiceCommand::Resume(
                crate::model::voice::Resume {
                    server_id: self.server_id,
                    session_id: self.session_id.clone(),
                    token: self.token.clone(),
                },
            ))
            .await
    }

    /// Sends `SELECT_PROTOCOL` with the externally-discovered UDP address.
    pub async fn select_protocol(
        &mut self,
        address: std::net::IpAddr,
        port: u16,
    ) -> ws::Result<()> {
        use crate::model::voice::{SelectProtocol, SelectProtocolData};

        self.sink
            .send_json(&crate::model::voice::VoiceCommand::SelectProtocol(
                SelectProtocol {
                    protocol: "udp",
                    data: SelectProtocolData {
                        address: address.to_string(),
                        port,
                        mode: super::crypto::MODE_NAME,
                    },
                },
            ))
            .await
    }

    /// Announces speaking state/ssrc over the voice socket.
    pub async fn speaking(&mut self, ssrc: u32, speaking: bool) -> ws::Result<()> {
        use crate::model::voice::Speaking;

        self.sink
            .send_json(&VoiceCommand::Speaking(Speaking {
                speaking: speaking as u8,
                delay: 0,
                ssrc,
            }))
            .await
    }

    /// Processes exactly one inbound message or outgoing heartbeat tick,
    /// waiting at most 30 seconds, mirroring discord.py's `poll_event`.
    #[instrument(skip(self))]
    pub async fn poll_event(&mut self) -> ws::Result<PollOutcome> {
        let polled = tokio::time::timeout(Duration::from_secs(30), async {
            tokio::select! {
                biased;

                _ = self.dead_rx.recv_async() => {
                    warn!("voice heartbeat zombied, forcing a close");
                    let code = 1006;
                    Ok(PollOutcome::ConnectionClosed {
                        code: Some(code),
                        resumable: VoiceCloseCode(code).is_resumable(),
                    })
                },

                hb = self.heartbeat_rx.recv_async() => {
                    if let Ok(cmd) = hb {
                        self.sink.send_json(&cmd).await?;
                    }
                    Ok(PollOutcome::Heartbeat)
                },

                msg = self.stream.recv_json_no_timeout::<VoiceEvent>() => {
                    match msg {
                        Ok(Some(VoiceEvent::Ready(r))) => Ok(PollOutcome::Ready(r)),
                        Ok(Some(VoiceEvent::SessionDescription(sd))) =>
                            Ok(PollOutcome::SessionDescription(sd)),
                        Ok(Some(VoiceEvent::Speaking(s))) => Ok(PollOutcome::Speaking {
                            ssrc: s.ssrc,
                            speaking: s.speaking != 0,
                        }),
                        Ok(Some(VoiceEvent::HeartbeatAck(_))) => {
                            self.heartbeat.ack();
                            Ok(PollOutcome::Heartbeat)
                        },
                        Ok(Some(VoiceEvent::InvalidateSession)) => {
                            debug!("voice session invalidated");
                            Ok(PollOutcome::SessionInvalidated)
                        },
                        Ok(Some(VoiceEvent::Hello(_))) | Ok(None) => Ok(PollOutcome::Heartbeat),
                        Err(ws::Error::WsClosed(frame)) => {
                            let code = frame.map(|f| f.code.into());
                            let resumable = code.map_or(true, |c| VoiceCloseCode(c).is_resumable());
                            warn!(?code, resumable, "voice connection closed");
                            Ok(PollOutcome::ConnectionClosed { code, resumable })
                        },
                        Err(e) => Err(e),
                    }
                },
            }
        })
        .await;

        match polled {
            Ok(outcome) => outcome,
            Err(_elapsed) => Ok(PollOutcome::Timeout),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Builds the `wss://{endpoint}/?v={VOICE_GATEWAY_VERSION}` connect URL,
/// stripping the trailing `:80` Discord's voice-server endpoints carry.
fn generate_url(endpoint: &str) -> ws::Result<Url> {
    let endpoint = endpoint.trim_end_matches(":80");
    Ok(Url::parse(&format!(
        "wss://{endpoint}/?v={}",
        crate::constants::VOICE_GATEWAY_VERSION
    ))?)
}

#[cfg(all(feature = "rustls-marker", not(feature = "native-marker")))]
async fn connect_client(url: Url) -> ws::Result<WsStream> {
    ws::create_rustls_client(url).await
}

#[cfg(feature = "native-marker")]
async fn connect_client(url: Url) -> ws::Result<WsStream> {
    ws::create_native_tls_client(url).await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generate_url_strips_trailing_port_80() {
        let url = generate_url("voice.example.com:80").unwrap();
        assert_eq!(url.host_str(), Some("voice.example.com"));
        assert!(url.as_str().starts_with("wss://voice.example.com/?v="));
    }

    #[test]
    fn close_code_4014_is_not_resumable() {
        assert!(!VoiceCloseCode(4014).is_resumable());
    }
}
