//! Interface boundary to an external control-plane (REST/cache) collaborator.

use crate::id::{ChannelId, GuildId};

/// A sender capable of dispatching a `VOICE_STATE_UPDATE` gateway command on
/// this crate's behalf.
///
/// This crate does not own a gateway shard connection itself when used in
/// "driver-only" mode (e.g. alongside a REST-only client or an externally
/// managed gateway); implementors bridge to whatever socket the shard
/// actually lives on.
pub trait ControlPlaneSender: Send + Sync {
    /// Requests Discord join, move, or leave a voice channel.
    ///
    /// `channel_id` of `None` requests a leave.
    fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    );
}
