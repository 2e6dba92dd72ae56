//! Constants affecting gateway and voice wire behaviour.

use std::time::Duration;

/// The voice gateway version used by the library.
pub const VOICE_GATEWAY_VERSION: u8 = 8;

/// The (control-plane) gateway version used by the library.
pub const GATEWAY_VERSION: u8 = 10;

/// Sample rate of audio to be sent to Discord.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Number of audio frames/packets to be sent per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Length of time between any two audio frames.
pub const TIMESTEP_LENGTH: Duration = Duration::from_millis(1000 / AUDIO_FRAME_RATE as u64);

/// Number of samples in one complete frame of audio per channel.
pub const MONO_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Number of individual samples in one complete frame of stereo audio.
pub const STEREO_FRAME_SIZE: usize = 2 * MONO_FRAME_SIZE;

/// Length (in milliseconds) of any audio frame.
pub const FRAME_LEN_MS: usize = 1000 / AUDIO_FRAME_RATE;

/// Maximum packet size for a voice packet.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const VOICE_PACKET_MAX: usize = 1460;

/// Delay between sends of UDP keepalive frames.
///
/// Passive monitoring of Discord itself shows that these fire every 5 seconds
/// irrespective of outgoing UDP traffic.
pub const UDP_KEEPALIVE_GAP_MS: u64 = 5_000;

/// Type-converted delay between sends of UDP keepalive frames.
pub const UDP_KEEPALIVE_GAP: Duration = Duration::from_millis(UDP_KEEPALIVE_GAP_MS);

/// Opus silent frame, used to signal speech start and end (and prevent audio glitching).
pub const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// The one (and only) RTP version.
pub const RTP_VERSION: u8 = 2;

/// Payload type byte used by Discord's Opus audio traffic (dynamic type 120).
pub const RTP_PROFILE_TYPE: u8 = 0x78;

/// Size in bytes of the IP discovery request/response packet.
pub const IP_DISCOVERY_PACKET_LEN: usize = 70;

/// Maximum time to wait for a heartbeat ack before declaring a connection a zombie.
///
/// Discord's own clients treat a missed ack within this multiple of the
/// heartbeat interval as a dead connection and force a reconnect.
pub const ZOMBIE_MULTIPLIER: u32 = 2;

/// Maximum decompressed size accepted for a single zlib-compressed gateway frame.
///
/// Matches discord.py's `zlib.decompress(msg, 15, 10490000)` cap.
pub const MAX_GATEWAY_INFLATE_SIZE: usize = 10_490_000;

/// Number of retry attempts the voice connection supervisor will make before
/// giving up on a connection.
pub const RECONNECT_ATTEMPTS: usize = 5;

/// Length in bytes of an `xsalsa20_poly1305` secret key.
pub const SECRET_KEY_LEN: usize = 32;
