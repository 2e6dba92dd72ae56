//! The voice connection supervisor: the nine-state flow machine that fuses
//! the two control-plane events (`voice_state_update`, `voice_server_update`)
//! with the voice signaling handshake and UDP discovery into a single
//! `connected` state, with resilient reconnect.
//!
//! Grounded line-for-line on `VoiceConnectionState` in
//! `original_source/discord/voice_state.py`: the same `ConnectionFlowState`
//! enum, the same `voice_state_update`/`voice_server_update` transition
//! table, the same 5-attempt connect loop with `1 + i*2.0`s backoff, the
//! same `soft_disconnect`/`disconnect(force, cleanup)` split, and the same
//! `_poll_voice_ws` close-code policy (`1000`/`4015` normal,
//! `4014` "potentially reconnect", anything else exponential backoff).
//!
//! Two structural differences from the source, both forced by Rust's
//! ownership model rather than by choice:
//!
//! - The source can reach into a running task's `self.ws` from the outside
//!   (e.g. to send a close frame while the poller awaits `poll_event`).
//!   Here the voice signaling socket is owned exclusively by the poller
//!   task for its lifetime; external teardown (`disconnect`/
//!   `soft_disconnect`) instead aborts that task outright, relying on drop
//!   to close the underlying connection. The poller's own close-code
//!   handling (run from inside the task) never aborts its own handle.
//! - State lives in a [`tokio::sync::watch`] channel rather than a bare
//!   field plus a pulsed `asyncio.Event`, so `wait_for_state` can never miss
//!   a transition that happens between checking the current value and
//!   awaiting the next change.

use crate::{
    config::SupervisorConfig,
    control::ControlPlaneSender,
    id::{ChannelId, GuildId, UserId},
    model::gateway::{VoiceServerUpdateEvent, VoiceStateUpdateEvent},
    voice::{
        backoff::ExponentialBackoff,
        connection,
        rtp::{RtpPacketizer, RtpSendState},
        signaling,
        socket_reader::SocketReader,
    },
};

use parking_lot::Mutex;
use std::{
    net::UdpSocket as StdUdpSocket,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, instrument, warn};

/// The nine states of a voice connection's happy path. Any state may
/// transition to [`ConnectionFlowState::Disconnected`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum ConnectionFlowState {
    Disconnected,
    SetGuildVoiceState,
    GotVoiceStateUpdate,
    GotVoiceServerUpdate,
    GotBothVoiceUpdates,
    WebsocketConnected,
    GotWebsocketReady,
    GotIpDiscovery,
    Connected,
}

/// A cheaply-cloneable handle for sending one encrypted RTP frame at a
/// time. Handed to a caller's audio pacer once the supervisor reaches
/// [`ConnectionFlowState::Connected`]; the sequence/timestamp counters
/// ([`RtpSendState`]) are *not* stored here; `voice_sender` hands out a
/// fresh copy to whichever single producer is driving playback, which then
/// owns and advances it exclusively, matching this crate's single-producer
/// RTP invariant.
#[derive(Clone)]
pub struct VoiceSender {
    socket: Arc<StdUdpSocket>,
    packetizer: Arc<RtpPacketizer>,
}

impl VoiceSender {
    /// Encrypts and sends one RTP frame carrying `opus_payload`, then
    /// advances `state` for the caller's next call.
    pub fn send_frame(
        &self,
        state: &mut RtpSendState,
        opus_payload: &[u8],
        samples_per_frame: u32,
    ) -> std::io::Result<()> {
        let mut buf = vec![0u8; RtpPacketizer::overhead() + opus_payload.len()];
        self.packetizer
            .packetize(state, opus_payload, &mut buf)
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "rtp encryption failed")
            })?;
        self.socket.send(&buf)?;
        state.advance(samples_per_frame);
        Ok(())
    }
}

#[derive(Default)]
struct SessionFields {
    session_id: Option<String>,
    token: Option<String>,
    endpoint: Option<String>,
}

struct ActiveVoice {
    sender: VoiceSender,
    ssrc: u32,
    rtp_state: RtpSendState,
}

struct Shared {
    state_tx: watch::Sender<ConnectionFlowState>,
    session: Mutex<SessionFields>,
    channel_id: Mutex<Option<ChannelId>>,
    expecting_disconnect: AtomicBool,
    socket_reader: Mutex<Option<SocketReader>>,
    voice: Mutex<Option<ActiveVoice>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    connector: Mutex<Option<JoinHandle<()>>>,
    /// Holding cell for the signaling state machine between
    /// `install_established` (run from the connector) and `spawn_poller`
    /// picking it back up, since [`connection::EstablishedVoice`] is
    /// consumed in one step but the poller task is spawned in the next.
    pending_signaling: Mutex<Option<signaling::VoiceSignalingStateMachine>>,
}

/// The nine-state voice connection flow machine. See the module docs.
pub struct VoiceConnectionSupervisor {
    guild_id: GuildId,
    user_id: UserId,
    control: Arc<dyn ControlPlaneSender>,
    config: SupervisorConfig,
    shared: Arc<Shared>,
}

impl VoiceConnectionSupervisor {
    /// Creates a new supervisor, initially [`ConnectionFlowState::Disconnected`].
    pub fn new(
        guild_id: GuildId,
        user_id: UserId,
        control: Arc<dyn ControlPlaneSender>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionFlowState::Disconnected);
        Arc::new(Self {
            guild_id,
            user_id,
            control,
            config,
            shared: Arc::new(Shared {
                state_tx,
                session: Mutex::new(SessionFields::default()),
                channel_id: Mutex::new(None),
                expecting_disconnect: AtomicBool::new(false),
                socket_reader: Mutex::new(None),
                voice: Mutex::new(None),
                poller: Mutex::new(None),
                connector: Mutex::new(None),
                pending_signaling: Mutex::new(None),
            }),
        })
    }

    /// The current flow state.
    pub fn state(&self) -> ConnectionFlowState {
        *self.shared.state_tx.borrow()
    }

    /// A sender for the live voice connection and a starting
    /// [`RtpSendState`], if currently [`ConnectionFlowState::Connected`].
    pub fn voice_sender(&self) -> Option<(VoiceSender, RtpSendState)> {
        self.shared
            .voice
            .lock()
            .as_ref()
            .map(|v| (v.sender.clone(), v.rtp_state))
    }

    /// The SSRC of the live voice connection, if connected.
    pub fn ssrc(&self) -> Option<u32> {
        self.shared.voice.lock().as_ref().map(|v| v.ssrc)
    }

    /// Requests joining `channel_id`, sending the control-plane voice-state
    /// update and starting the connect/reconnect loop.
    ///
    /// If [`SupervisorConfig::wait`] is set, awaits until the connection
    /// reaches [`ConnectionFlowState::Connected`] or the configured timeout
    /// elapses.
    #[instrument(skip(self))]
    pub async fn connect(self: &Arc<Self>, channel_id: ChannelId) {
        *self.shared.channel_id.lock() = Some(channel_id);
        if self.state() == ConnectionFlowState::Disconnected {
            self.transition_to(ConnectionFlowState::SetGuildVoiceState);
        }

        self.spawn_connect(self.config.reconnect, self.config.resume);

        if self.config.wait {
            let _ = self
                .wait_for_state(ConnectionFlowState::Connected, self.config.timeout)
                .await;
        }
    }

    /// Requests moving to `channel_id` (or leaving, if `None`) without
    /// itself driving the ensuing handshake -- mirrors the source's
    /// `move_to`, which only nudges state and lets the existing
    /// connect/reconnect machinery (or a fresh [`Self::connect`] call)
    /// catch up.
    pub async fn move_to(self: &Arc<Self>, channel_id: Option<ChannelId>) {
        match channel_id {
            None => self.disconnect(),
            Some(id) => {
                *self.shared.channel_id.lock() = Some(id);
                self.control
                    .update_voice_state(self.guild_id, Some(id), self.config.self_mute, self.config.self_deaf);
                self.transition_to(ConnectionFlowState::SetGuildVoiceState);
            },
        }
    }

    /// Feeds a gateway `VOICE_STATE_UPDATE` dispatch into the flow machine.
    #[instrument(skip(self, event), fields(channel_id = ?event.channel_id))]
    pub fn handle_voice_state_update(self: &Arc<Self>, event: VoiceStateUpdateEvent) {
        let Some(channel_id) = event.channel_id else {
            if self.shared.expecting_disconnect.swap(false, Ordering::AcqRel) {
                debug!("ignoring voice_state_update echo of our own disconnect");
            } else {
                debug!("externally disconnected from voice");
                self.disconnect();
            }
            return;
        };

        self.shared.session.lock().session_id = Some(event.session_id);

        match self.state() {
            ConnectionFlowState::SetGuildVoiceState => {
                self.transition_to(ConnectionFlowState::GotVoiceStateUpdate);
            },
            ConnectionFlowState::GotVoiceServerUpdate => {
                self.transition_to(ConnectionFlowState::GotBothVoiceUpdates);
            },
            ConnectionFlowState::GotVoiceStateUpdate => {
                debug!("duplicate voice_state_update before voice_server_update arrived");
            },
            ConnectionFlowState::Disconnected => {},
            _ => {
                let previous = self.shared.channel_id.lock().replace(channel_id);
                if previous != Some(channel_id) {
                    info!(?channel_id, "handling voice channel move");
                    self.soft_disconnect(ConnectionFlowState::GotVoiceStateUpdate);
                    self.spawn_connect(true, false);
                } else {
                    debug!("ignoring unexpected voice_state_update event");
                }
            },
        }
    }

    /// Feeds a gateway `VOICE_SERVER_UPDATE` dispatch into the flow machine.
    #[instrument(skip(self, event), fields(guild_id = ?event.guild_id))]
    pub fn handle_voice_server_update(self: &Arc<Self>, event: VoiceServerUpdateEvent) {
        let Some(raw_endpoint) = event.endpoint else {
            warn!("awaiting endpoint; voice_server_update had none yet");
            return;
        };
        let endpoint = normalize_endpoint(&raw_endpoint);

        {
            let mut session = self.shared.session.lock();
            session.token = Some(event.token);
            session.endpoint = Some(endpoint);
        }

        match self.state() {
            ConnectionFlowState::SetGuildVoiceState => {
                self.transition_to(ConnectionFlowState::GotVoiceServerUpdate);
            },
            ConnectionFlowState::GotVoiceStateUpdate => {
                self.transition_to(ConnectionFlowState::GotBothVoiceUpdates);
            },
            ConnectionFlowState::GotVoiceServerUpdate => {
                debug!("endpoint updated again before voice_state_update arrived");
            },
            ConnectionFlowState::Connected => {
                info!("voice server update while connected, closing voice socket for reconnect");
                self.soft_disconnect(ConnectionFlowState::GotVoiceServerUpdate);
                self.spawn_resync(true);
            },
            ConnectionFlowState::Disconnected => {},
            _ => {
                debug!("unexpected voice_server_update, tearing down for reconnect");
                self.soft_disconnect(ConnectionFlowState::GotVoiceServerUpdate);
                self.spawn_connect(true, false);
            },
        }
    }

    /// Full disconnect: tells the control plane we left, clears all session
    /// state, and tears down the UDP socket and its reader. Cancels any
    /// in-flight connector/poller task.
    pub fn disconnect(self: &Arc<Self>) {
        if let Some(h) = self.shared.poller.lock().take() {
            h.abort();
        }
        if let Some(h) = self.shared.connector.lock().take() {
            h.abort();
        }
        self.disconnect_sync(true);
    }

    /// Tears down the active connection to immediately reconnect, without
    /// signalling the control plane that we left. Always runs from outside
    /// the poller task (never called from within [`Self::run_poller`]),
    /// since aborting your own currently-running task's handle is unsound.
    fn soft_disconnect(&self, with_state: ConnectionFlowState) {
        debug!("soft disconnecting from voice");
        if let Some(h) = self.shared.poller.lock().take() {
            h.abort();
        }
        *self.shared.voice.lock() = None;
        if let Some(reader) = self.shared.socket_reader.lock().as_ref() {
            reader.pause();
        }
        self.transition_to(with_state);
    }

    /// Synchronous teardown shared by external [`Self::disconnect`] and the
    /// poller's own close-code handling. Always signals the control plane
    /// and sets `expecting_disconnect`, matching the source's
    /// `_voice_disconnect`, which runs unconditionally regardless of
    /// `cleanup`. `cleanup` only controls whether the socket reader thread
    /// is stopped outright versus merely paused for reuse on an imminent
    /// retry.
    fn disconnect_sync(&self, cleanup: bool) {
        self.shared.expecting_disconnect.store(true, Ordering::Release);
        self.control
            .update_voice_state(self.guild_id, None, false, false);
        *self.shared.voice.lock() = None;
        if cleanup {
            *self.shared.socket_reader.lock() = None;
        } else if let Some(reader) = self.shared.socket_reader.lock().as_ref() {
            reader.pause();
        }
        self.transition_to(ConnectionFlowState::Disconnected);
    }

    fn transition_to(&self, new: ConnectionFlowState) {
        let old = *self.shared.state_tx.borrow();
        if old != new {
            debug!(?old, ?new, "voice connection state changed");
        }
        let _ = self.shared.state_tx.send(new);
    }

    async fn wait_for_state(&self, target: ConnectionFlowState, timeout: Duration) -> Result<(), ()> {
        self.wait_for_any_state(&[target], timeout).await
    }

    async fn wait_for_any_state(
        &self,
        targets: &[ConnectionFlowState],
        timeout: Duration,
    ) -> Result<(), ()> {
        let mut rx = self.shared.state_tx.subscribe();
        tokio::time::timeout(timeout, async {
            loop {
                if targets.contains(&*rx.borrow()) {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .map_err(|_| ())
    }

    fn spawn_connect(self: &Arc<Self>, reconnect: bool, resume: bool) {
        if let Some(h) = self.shared.connector.lock().take() {
            h.abort();
        }
        if let Some(h) = self.shared.poller.lock().take() {
            h.abort();
        }
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_connect(reconnect, resume).await });
        *self.shared.connector.lock() = Some(handle);
    }

    fn spawn_poller(self: &Arc<Self>, signaling: signaling::VoiceSignalingStateMachine, reconnect: bool) {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_poller(signaling, reconnect).await });
        *self.shared.poller.lock() = Some(handle);
    }

    /// Redoes the handshake on the socket that was just soft-disconnected,
    /// without re-running the full connect loop's control-plane round trip.
    ///
    /// The source handles this case by closing its own voice websocket with
    /// `4014` and letting its still-running poller observe that closure and
    /// call `_potential_reconnect`; here the poller task is aborted as part
    /// of [`Self::soft_disconnect`] (its socket isn't reachable from outside
    /// the task that owns it), so this replaces it to drive the same
    /// single-attempt [`Self::potential_reconnect`] logic instead of
    /// re-running [`Self::run_connect`]'s full wait-for-both-updates cycle
    /// -- we already hold everything `potential_reconnect` needs.
    fn spawn_resync(self: &Arc<Self>, reconnect: bool) {
        if let Some(h) = self.shared.connector.lock().take() {
            h.abort();
        }
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_resync(reconnect).await });
        *self.shared.connector.lock() = Some(handle);
    }

    async fn run_resync(self: Arc<Self>, reconnect: bool) {
        match self.potential_reconnect().await {
            Some(signaling) => self.spawn_poller(signaling, reconnect),
            None => {
                info!("resync unsuccessful, disconnecting from voice normally");
                self.disconnect_sync(true);
            },
        }
    }

    /// The connection-attempt loop: up to
    /// [`crate::constants::RECONNECT_ATTEMPTS`] tries, each sending the
    /// control-plane voice-state update, waiting for both control-plane
    /// events, then running the signaling handshake within
    /// [`SupervisorConfig::timeout`].
    #[instrument(skip(self))]
    async fn run_connect(self: Arc<Self>, reconnect: bool, resume: bool) {
        for attempt in 0..crate::constants::RECONNECT_ATTEMPTS {
            info!(attempt, "starting voice handshake attempt");

            let channel_id = *self.shared.channel_id.lock();
            self.control.update_voice_state(
                self.guild_id,
                channel_id,
                self.config.self_mute,
                self.config.self_deaf,
            );

            if self.state() == ConnectionFlowState::Disconnected {
                self.transition_to(ConnectionFlowState::SetGuildVoiceState);
            }

            if self
                .wait_for_state(ConnectionFlowState::GotBothVoiceUpdates, self.config.timeout)
                .await
                .is_err()
            {
                info!("timed out waiting for voice handshake");
                self.disconnect_sync(true);
                return;
            }

            match self.attempt_handshake(resume).await {
                Ok(established) => {
                    if let Err(e) = self.install_established(established) {
                        warn!(error = %e, "failed to install voice socket");
                        self.disconnect_sync(true);
                        return;
                    }
                    self.transition_to(ConnectionFlowState::Connected);
                    let signaling = self.take_pending_signaling();
                    self.spawn_poller(signaling, reconnect);
                    return;
                },
                Err(e) if reconnect => {
                    let wait = Duration::from_secs_f64(1.0 + attempt as f64 * 2.0);
                    warn!(error = %e, ?wait, "voice handshake failed, retrying");
                    self.disconnect_sync(false);
                    tokio::time::sleep(wait).await;
                    continue;
                },
                Err(e) => {
                    warn!(error = %e, "voice handshake failed");
                    self.disconnect_sync(true);
                    return;
                },
            }
        }

        warn!("voice connection retry attempts exhausted");
        self.disconnect_sync(true);
    }

    /// Runs the voice signaling handshake (identify/resume through
    /// `SESSION_DESCRIPTION`), reporting each milestone as a state
    /// transition via the [`connection::connect`] phase callback, and
    /// bounding the whole attempt by [`SupervisorConfig::timeout`].
    async fn attempt_handshake(&self, resume: bool) -> connection::Result<connection::EstablishedVoice> {
        let (endpoint, token, session_id) = {
            let session = self.shared.session.lock();
            match (
                session.endpoint.clone(),
                session.token.clone(),
                session.session_id.clone(),
            ) {
                (Some(e), Some(t), Some(s)) => (e, t, s),
                _ => return Err(connection::Error::TimedOut),
            }
        };

        let shared = self.shared.clone();
        let fut = connection::connect(
            &endpoint,
            self.guild_id,
            self.user_id,
            session_id,
            token,
            resume,
            move |phase| {
                let new_state = match phase {
                    connection::Phase::WebsocketConnected => ConnectionFlowState::WebsocketConnected,
                    connection::Phase::WebsocketReady => ConnectionFlowState::GotWebsocketReady,
                    connection::Phase::GotIpDiscovery => ConnectionFlowState::GotIpDiscovery,
                };
                let _ = shared.state_tx.send(new_state);
            },
        );

        tokio::time::timeout(self.config.timeout, fut)
            .await
            .unwrap_or(Err(connection::Error::TimedOut))
    }

    /// Binds the negotiated UDP socket's write side into a [`VoiceSender`]
    /// and spawns a [`SocketReader`] over a cloned read side, but stashes
    /// the signaling state machine itself for the caller to hand to the
    /// poller -- see [`Self::take_pending_signaling`].
    fn install_established(&self, established: connection::EstablishedVoice) -> std::io::Result<()> {
        let connection::EstablishedVoice {
            signaling,
            socket,
            ssrc,
            packetizer,
            rtp_state,
        } = established;

        let std_socket = socket.into_std()?;
        std_socket.set_nonblocking(false)?;
        let reader_socket = std_socket.try_clone()?;

        let sender = VoiceSender {
            socket: Arc::new(std_socket),
            packetizer: Arc::new(packetizer),
        };
        let reader = SocketReader::spawn(reader_socket)?;

        *self.shared.socket_reader.lock() = Some(reader);
        *self.shared.voice.lock() = Some(ActiveVoice { sender, ssrc, rtp_state });
        *self.shared.pending_signaling.lock() = Some(signaling);
        Ok(())
    }

    fn take_pending_signaling(&self) -> signaling::VoiceSignalingStateMachine {
        self.shared
            .pending_signaling
            .lock()
            .take()
            .expect("install_established always populates pending_signaling first")
    }

    /// The poller task: repeatedly calls `poll_event` on the signaling
    /// socket and reacts to close codes, exactly mirroring the source's
    /// `_poll_voice_ws`.
    #[instrument(skip(self, signaling))]
    async fn run_poller(self: Arc<Self>, mut signaling: signaling::VoiceSignalingStateMachine, reconnect: bool) {
        let mut backoff = ExponentialBackoff::default();

        loop {
            match signaling.poll_event().await {
                Ok(signaling::PollOutcome::ConnectionClosed { code, resumable }) => {
                    let code = code.unwrap_or(1000);
                    match code {
                        1000 | 4015 => {
                            info!(code, "disconnecting from voice normally");
                            self.disconnect_sync(true);
                            return;
                        },
                        4014 => {
                            info!("disconnected from voice by force, attempting to reconnect");
                            match self.potential_reconnect().await {
                                Some(new_signaling) => {
                                    signaling = new_signaling;
                                    continue;
                                },
                                None => {
                                    info!("reconnect unsuccessful, disconnecting from voice normally");
                                    self.disconnect_sync(true);
                                    return;
                                },
                            }
                        },
                        other => {
                            debug!(other, resumable, "not handling this close code specially");
                            if !reconnect || !resumable {
                                self.disconnect_sync(true);
                                return;
                            }
                            let wait = backoff.next_delay();
                            warn!(?wait, "disconnected from voice, reconnecting");
                            tokio::time::sleep(wait).await;
                            self.disconnect_sync(false);
                            tokio::time::sleep(Duration::from_millis(500)).await;
                            self.spawn_connect(reconnect, false);
                            return;
                        },
                    }
                },
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = ?e, "voice signaling transport error");
                    if !reconnect {
                        self.disconnect_sync(true);
                        return;
                    }
                    let wait = backoff.next_delay();
                    tokio::time::sleep(wait).await;
                    self.disconnect_sync(false);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    self.spawn_connect(reconnect, false);
                    return;
                },
            }
        }
    }

    /// Waits for a fresh `voice_server_update`, then redoes the signaling
    /// handshake on a brand-new socket; used after an externally-forced
    /// close (`4014`). Never touches the poller's own task handle.
    async fn potential_reconnect(self: &Arc<Self>) -> Option<signaling::VoiceSignalingStateMachine> {
        self.wait_for_any_state(
            &[
                ConnectionFlowState::GotVoiceServerUpdate,
                ConnectionFlowState::GotBothVoiceUpdates,
            ],
            self.config.timeout,
        )
        .await
        .ok()?;

        match self.attempt_handshake(false).await {
            Ok(established) => {
                self.install_established(established).ok()?;
                self.transition_to(ConnectionFlowState::Connected);
                Some(self.take_pending_signaling())
            },
            Err(_) => None,
        }
    }
}

/// Strips an optional `wss://` scheme and a trailing `:port` suffix from a
/// `voice_server_update` endpoint, e.g. `"wss://us-east1.discord.media:443"`
/// -> `"us-east1.discord.media"`.
fn normalize_endpoint(raw: &str) -> String {
    let raw = raw.strip_prefix("wss://").unwrap_or(raw);
    match raw.rsplit_once(':') {
        Some((host, _port)) => host.to_owned(),
        None => raw.to_owned(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::num::NonZeroU64;

    struct RecordingControl {
        calls: Mutex<Vec<Option<ChannelId>>>,
    }

    impl RecordingControl {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ControlPlaneSender for RecordingControl {
        fn update_voice_state(
            &self,
            _guild_id: GuildId,
            channel_id: Option<ChannelId>,
            _self_mute: bool,
            _self_deaf: bool,
        ) {
            self.calls.lock().push(channel_id);
        }
    }

    fn ids() -> (GuildId, UserId, ChannelId) {
        (
            GuildId(NonZeroU64::new(1).unwrap()),
            UserId(NonZeroU64::new(2).unwrap()),
            ChannelId(NonZeroU64::new(3).unwrap()),
        )
    }

    fn voice_server_update(endpoint: Option<&str>) -> VoiceServerUpdateEvent {
        let (guild_id, _, _) = ids();
        VoiceServerUpdateEvent {
            token: "tok".into(),
            guild_id,
            endpoint: endpoint.map(str::to_owned),
        }
    }

    fn voice_state_update(channel_id: Option<ChannelId>) -> VoiceStateUpdateEvent {
        let (guild_id, user_id, _) = ids();
        VoiceStateUpdateEvent {
            guild_id: Some(guild_id),
            channel_id,
            user_id,
            session_id: "sess".into(),
        }
    }

    #[test]
    fn normalize_endpoint_strips_scheme_and_port() {
        assert_eq!(
            normalize_endpoint("wss://us-east1.discord.media:443"),
            "us-east1.discord.media"
        );
        assert_eq!(normalize_endpoint("us-east1.discord.media:443"), "us-east1.discord.media");
        assert_eq!(normalize_endpoint("us-east1.discord.media"), "us-east1.discord.media");
    }

    #[tokio::test]
    async fn reaches_got_both_voice_updates_server_update_first() {
        let (guild_id, user_id, channel_id) = ids();
        let sup = VoiceConnectionSupervisor::new(
            guild_id,
            user_id,
            Arc::new(RecordingControl::new()),
            SupervisorConfig::default(),
        );

        sup.transition_to(ConnectionFlowState::SetGuildVoiceState);
        sup.handle_voice_server_update(voice_server_update(Some("voice.example.com:443")));
        assert_eq!(sup.state(), ConnectionFlowState::GotVoiceServerUpdate);

        sup.handle_voice_state_update(voice_state_update(Some(channel_id)));
        assert_eq!(sup.state(), ConnectionFlowState::GotBothVoiceUpdates);
    }

    #[tokio::test]
    async fn reaches_got_both_voice_updates_state_update_first() {
        let (guild_id, user_id, channel_id) = ids();
        let sup = VoiceConnectionSupervisor::new(
            guild_id,
            user_id,
            Arc::new(RecordingControl::new()),
            SupervisorConfig::default(),
        );

        sup.transition_to(ConnectionFlowState::SetGuildVoiceState);
        sup.handle_voice_state_update(voice_state_update(Some(channel_id)));
        assert_eq!(sup.state(), ConnectionFlowState::GotVoiceStateUpdate);

        sup.handle_voice_server_update(voice_server_update(Some("voice.example.com:443")));
        assert_eq!(sup.state(), ConnectionFlowState::GotBothVoiceUpdates);
    }

    #[tokio::test]
    async fn external_disconnect_while_connected_leaves_the_channel() {
        let (guild_id, user_id, _) = ids();
        let control = Arc::new(RecordingControl::new());
        let sup = VoiceConnectionSupervisor::new(guild_id, user_id, control.clone(), SupervisorConfig::default());

        sup.transition_to(ConnectionFlowState::Connected);
        sup.handle_voice_state_update(voice_state_update(None));

        assert_eq!(sup.state(), ConnectionFlowState::Disconnected);
        assert_eq!(control.calls.lock().last(), Some(&None));
    }

    #[tokio::test]
    async fn our_own_disconnect_echo_is_ignored() {
        let (guild_id, user_id, _) = ids();
        let control = Arc::new(RecordingControl::new());
        let sup = VoiceConnectionSupervisor::new(guild_id, user_id, control.clone(), SupervisorConfig::default());

        sup.transition_to(ConnectionFlowState::Connected);
        sup.shared.expecting_disconnect.store(true, Ordering::Release);
        sup.handle_voice_state_update(voice_state_update(None));

        // No disconnect performed: state is untouched and no leave was sent.
        assert_eq!(sup.state(), ConnectionFlowState::Connected);
        assert!(control.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn channel_move_while_connected_soft_disconnects() {
        let (guild_id, user_id, channel_id) = ids();
        let other_channel = ChannelId(NonZeroU64::new(99).unwrap());
        let control = Arc::new(RecordingControl::new());
        let sup = VoiceConnectionSupervisor::new(guild_id, user_id, control, SupervisorConfig::default());

        *sup.shared.channel_id.lock() = Some(channel_id);
        sup.transition_to(ConnectionFlowState::Connected);

        sup.handle_voice_state_update(voice_state_update(Some(other_channel)));

        assert_eq!(sup.state(), ConnectionFlowState::GotVoiceStateUpdate);
        assert_eq!(*sup.shared.channel_id.lock(), Some(other_channel));
    }
}
