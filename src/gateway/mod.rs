//! The control-plane gateway state machine: identify/resume, heartbeating,
//! dispatch scanning, and `wait_for`-style one-shot event listeners.
//!
//! Grounded line-for-line on `DiscordWebSocket` in discord.py's
//! `gateway.py`: the same opcode table, the same "`poll_event` returns a
//! tagged outcome rather than raising" shape (this crate's [`PollOutcome`]),
//! and the same `EventListener`/`wait_for` dispatch-scan registration.

pub mod heartbeat;

use crate::{
    constants::GATEWAY_VERSION,
    model::gateway::{DispatchEvent, GatewayCommand, GatewayEvent, Hello, Identify, Resume},
    ws::{self, ReceiverExt, SenderExt, WsStream},
};
use heartbeat::HeartbeatDriver;

use async_tungstenite::tungstenite::Message;
use flume::{Receiver, Sender};
use futures::{
    stream::{SplitSink, SplitStream},
    StreamExt,
};
use std::{
    error::Error as StdError,
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Error surface specific to the control-plane gateway.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Transport-level failure (TLS, JSON, or an unexpected close frame).
    Transport(ws::Error),
    /// The configured gateway URL could not be parsed.
    InvalidUrl(url::ParseError),
}

impl From<ws::Error> for Error {
    fn from(e: ws::Error) -> Self {
        Error::Transport(e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidUrl(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "gateway transport error: {e:?}"),
            Error::InvalidUrl(e) => write!(f, "invalid gateway url: {e}"),
        }
    }
}

impl StdError for Error {}

/// A [`std::result::Result`] defaulted to this module's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Integer close code sent by Discord when it closes the gateway socket.
///
/// Wraps the bare literals discord.py's `_can_handle_close` hard-codes so
/// the resumability policy lives as code, not scattered magic numbers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GatewayCloseCode(pub u16);

impl GatewayCloseCode {
    const NON_RESUMABLE: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

    /// Whether the client should attempt `RESUME` rather than a fresh
    /// `IDENTIFY` after this close.
    pub fn is_resumable(self) -> bool {
        self.0 != 1000 && !Self::NON_RESUMABLE.contains(&self.0)
    }

    /// Authentication/configuration failures that will recur on retry and
    /// should not be retried automatically at all.
    pub fn is_terminal(self) -> bool {
        Self::NON_RESUMABLE.contains(&self.0)
    }
}

/// Per-connection session data: unchanged across a `RESUME`, reset on a
/// fresh `IDENTIFY`.
#[derive(Clone, Debug, Default)]
#[allow(missing_docs)]
pub struct GatewaySession {
    pub session_id: Option<String>,
    pub sequence: Option<u64>,
}

/// A registered one-shot `wait_for` listener, scanned against every
/// dispatch event until its predicate matches or it is dropped.
struct EventListener {
    check: Box<dyn Fn(&DispatchEvent) -> bool + Send>,
    tx: Sender<DispatchEvent>,
}

/// Outcome of a single [`GatewayStateMachine::poll_event`] call.
///
/// Replaces discord.py's control flow of raising `ResumeWebSocket` as a
/// signal: callers match on this instead of catching an exception.
#[derive(Debug)]
#[allow(missing_docs)]
pub enum PollOutcome {
    Dispatched(DispatchEvent),
    Heartbeat,
    ResumeRequested,
    SessionInvalidated { resumable: bool },
    /// The socket closed; `resumable` is [`GatewayCloseCode::is_resumable`]
    /// applied to `code` (defaulting to `true` when Discord sent no code).
    ConnectionClosed { code: Option<u16>, resumable: bool },
}

/// The control-plane gateway WebSocket, with its heartbeat task and
/// registered dispatch listeners.
pub struct GatewayStateMachine {
    token: String,
    intents: u64,
    session: GatewaySession,
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    listeners: Vec<EventListener>,
    heartbeat: HeartbeatDriver,
    heartbeat_rx: Receiver<GatewayCommand>,
    dead_rx: Receiver<()>,
    sequence_for_beat: Arc<AtomicI64>,
}

impl GatewayStateMachine {
    /// Connects, awaits `HELLO`, starts heartbeating, and sends `IDENTIFY`.
    #[instrument(skip(token))]
    pub async fn connect(token: impl Into<String>, intents: u64) -> Result<Self> {
        let token = token.into();
        let url = Url::parse(&format!(
            "wss://gateway.discord.gg/?v={GATEWAY_VERSION}&encoding=json"
        ))?;

        let ws = connect_client(url).await?;
        let (mut sink, mut stream) = ws.split();

        let hello: Hello = loop {
            match stream.recv_json_no_timeout::<GatewayEvent>().await? {
                Some(GatewayEvent::Hello(h)) => break h,
                Some(_) | None => continue,
            }
        };

        let (heartbeat_tx, heartbeat_rx) = flume::unbounded();
        let (dead_tx, dead_rx) = flume::unbounded();
        let sequence_for_beat = Arc::new(AtomicI64::new(-1));
        let heartbeat = {
            let sequence_for_beat = sequence_for_beat.clone();
            HeartbeatDriver::start(
                Duration::from_secs_f64(hello.heartbeat_interval / 1000.0),
                move || {
                    let seq = sequence_for_beat.load(Ordering::Acquire);
                    GatewayCommand::Heartbeat(if seq >= 0 { Some(seq as u64) } else { None })
                },
                heartbeat_tx,
                dead_tx,
            )
        };

        sink.send_json(&GatewayCommand::Identify(Identify {
            token: token.clone(),
            properties: Default::default(),
            compress: true,
            large_threshold: 250,
            intents,
            shard: None,
            presence: None,
        }))
        .await?;

        Ok(Self {
            token,
            intents,
            session: GatewaySession::default(),
            sink,
            stream,
            listeners: Vec::new(),
            heartbeat,
            heartbeat_rx,
            dead_rx,
            sequence_for_beat,
        })
    }

    /// Resumes a previous session using its `session_id`/`sequence`.
    #[instrument(skip(self))]
    pub async fn resume(&mut self) -> Result<()> {
        let session_id = self
            .session
            .session_id
            .clone()
            .expect("resume attempted without a prior session_id");
        let seq = self.session.sequence.unwrap_or(0);

        self.sink
            .send_json(&GatewayCommand::Resume(Resume {
                token: self.token.clone(),
                session_id,
                seq,
            }))
            .await?;

        Ok(())
    }

    /// Current session state (for persisting across a reconnect attempt).
    pub fn session(&self) -> &GatewaySession {
        &self.session
    }

    /// Registers a one-shot listener that resolves once a dispatch event
    /// matching `check` arrives, or `timeout_after` elapses.
    pub async fn wait_for(
        &mut self,
        timeout_after: Duration,
        check: impl Fn(&DispatchEvent) -> bool + Send + 'static,
    ) -> Option<DispatchEvent> {
        let (tx, rx) = flume::bounded(1);
        self.listeners.push(EventListener {
            check: Box::new(check),
            tx,
        });
        timeout(timeout_after, rx.recv_async()).await.ok()?.ok()
    }

    fn scan_listeners(&mut self, evt: &DispatchEvent) {
        self.listeners.retain(|l| {
            if (l.check)(evt) {
                let _ = l.tx.send(evt.clone());
                false
            } else {
                true
            }
        });
    }

    /// Processes exactly one inbound message or outgoing heartbeat tick.
    #[instrument(skip(self))]
    pub async fn poll_event(&mut self) -> Result<PollOutcome> {
        tokio::select! {
            biased;

            _ = self.dead_rx.recv_async() => {
                warn!("gateway heartbeat zombied, forcing a close");
                let code = 1006;
                Ok(PollOutcome::ConnectionClosed {
                    code: Some(code),
                    resumable: GatewayCloseCode(code).is_resumable(),
                })
            },

            hb = self.heartbeat_rx.recv_async() => {
                if let Ok(cmd) = hb {
                    self.sink.send_json(&cmd).await?;
                }
                Ok(PollOutcome::Heartbeat)
            },

            msg = self.stream.recv_json_no_timeout::<GatewayEvent>() => {
                match msg {
                    Ok(Some(GatewayEvent::Dispatch(seq, evt))) => {
                        self.session.sequence = Some(seq);
                        self.sequence_for_beat.store(seq as i64, Ordering::Release);
                        self.scan_listeners(&evt);
                        Ok(PollOutcome::Dispatched(evt))
                    },
                    Ok(Some(GatewayEvent::Heartbeat(_))) => {
                        self.sink
                            .send_json(&GatewayCommand::Heartbeat(self.session.sequence))
                            .await?;
                        Ok(PollOutcome::Heartbeat)
                    },
                    Ok(Some(GatewayEvent::HeartbeatAck)) => {
                        self.heartbeat.ack();
                        Ok(PollOutcome::Heartbeat)
                    },
                    Ok(Some(GatewayEvent::Reconnect)) => {
                        debug!("gateway requested reconnect");
                        Ok(PollOutcome::ResumeRequested)
                    },
                    Ok(Some(GatewayEvent::InvalidateSession(resumable))) => {
                        info!(resumable, "gateway session invalidated");
                        Ok(PollOutcome::SessionInvalidated { resumable })
                    },
                    Ok(Some(GatewayEvent::Hello(_))) | Ok(None) => Ok(PollOutcome::Heartbeat),
                    Err(ws::Error::WsClosed(frame)) => {
                        let code = frame.map(|f| f.code.into());
                        let resumable = code.map_or(true, |c| GatewayCloseCode(c).is_resumable());
                        warn!(?code, resumable, "gateway connection closed");
                        Ok(PollOutcome::ConnectionClosed { code, resumable })
                    },
                    Err(e) => Err(e.into()),
                }
            },
        }
    }

    /// Stores a `READY`/`RESUMED` session id once seen in a dispatch.
    pub fn set_session_id(&mut self, session_id: String) {
        self.session.session_id = Some(session_id);
    }
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
    fn close_code_1000_is_not_resumable() {
        assert!(!GatewayCloseCode(1000).is_resumable());
    }

    #[test]
    fn close_code_4014_is_terminal() {
        assert!(GatewayCloseCode(4014).is_terminal());
        assert!(!GatewayCloseCode(4014).is_resumable());
    }

    #[test]
    fn unrecognised_close_code_is_treated_as_resumable() {
        assert!(GatewayCloseCode(4000).is_resumable());
        assert!(!GatewayCloseCode(4000).is_terminal());
    }
}
