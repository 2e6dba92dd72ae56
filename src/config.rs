//! Configuration for the voice connection supervisor.

use std::time::Duration;

/// Configuration for the [`VoiceConnectionSupervisor`].
///
/// [`VoiceConnectionSupervisor`]: crate::voice::supervisor::VoiceConnectionSupervisor
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SupervisorConfig {
    /// Whether the bot should join the channel self-deafened.
    pub self_deaf: bool,
    /// Whether the bot should join the channel self-muted.
    pub self_mute: bool,
    /// How long to wait for Discord to deliver both the voice-state and
    /// voice-server updates needed to start connecting.
    ///
    /// Defaults to 10 seconds.
    pub timeout: Duration,
    /// Whether a dropped voice-signaling WebSocket should attempt `RESUME`
    /// before falling back to a full reconnect.
    ///
    /// Defaults to `true`.
    pub resume: bool,
    /// Whether the supervisor should automatically reconnect after a
    /// resumable close or network failure.
    ///
    /// Defaults to `true`.
    pub reconnect: bool,
    /// Whether `connect`/`move_to` should block the caller until the
    /// connection reaches [`ConnectionFlowState::Connected`], or return as
    /// soon as the request has been submitted.
    ///
    /// Defaults to `true`.
    ///
    /// [`ConnectionFlowState::Connected`]: crate::voice::supervisor::ConnectionFlowState::Connected
    pub wait: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            self_deaf: false,
            self_mute: false,
            timeout: Duration::from_secs(10),
            resume: true,
            reconnect: true,
            wait: true,
        }
    }
}

impl SupervisorConfig {
    /// Sets whether the bot joins self-deafened.
    #[must_use]
    pub fn self_deaf(mut self, self_deaf: bool) -> Self {
        self.self_deaf = self_deaf;
        self
    }

    /// Sets whether the bot joins self-muted.
    #[must_use]
    pub fn self_mute(mut self, self_mute: bool) -> Self {
        self.self_mute = self_mute;
        self
    }

    /// Sets the timeout for gathering voice-state/voice-server updates.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether `RESUME` is attempted before a full reconnect.
    #[must_use]
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Sets whether the supervisor reconnects automatically.
    #[must_use]
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets whether connection requests block until fully connected.
    #[must_use]
    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}
