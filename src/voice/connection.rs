//! Drives one voice signaling handshake to completion: connects the voice
//! WebSocket, performs UDP IP discovery, negotiates the encryption mode, and
//! hands back everything the data-plane needs to start sending.
//!
//! Grounded on `Connection::new_inner` in `driver/connection/mod.rs`: bind a
//! UDP socket, zero its receive buffer (this crate never reads voice RTP, so
//! there's nothing to buffer), connect it to the address `READY` gave us,
//! run IP discovery, `SELECT_PROTOCOL`, then wait for `SESSION_DESCRIPTION`.

use super::{
    rtp::{RtpPacketizer, RtpSendState},
    signaling::{PollOutcome, VoiceSignalingStateMachine},
    udp,
};
use crate::id::{GuildId, UserId};

use crypto_secretbox::{KeyInit, XSalsa20Poly1305 as Cipher};
use socket2::Socket;
use std::{error::Error as StdError, fmt, net::SocketAddr};
use tokio::net::UdpSocket;
use tracing::{info, instrument};

/// Errors that can occur while establishing a voice connection.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Transport-level failure on the voice signaling WebSocket.
    Signaling(crate::ws::Error),
    /// The IP discovery exchange failed or timed out.
    Discovery(udp::Error),
    /// Discord handed back a secret key of the wrong length for
    /// `xsalsa20_poly1305` (32 bytes).
    CryptoKeyLength(usize),
    /// An I/O failure binding or using the UDP socket.
    Io(std::io::Error),
    /// The connection attempt exceeded its configured timeout.
    TimedOut,
}

impl From<crate::ws::Error> for Error {
    fn from(e: crate::ws::Error) -> Self {
        Error::Signaling(e)
    }
}

impl From<udp::Error> for Error {
    fn from(e: udp::Error) -> Self {
        Error::Discovery(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Signaling(e) => write!(f, "voice signaling error: {e:?}"),
            Error::Discovery(e) => write!(f, "ip discovery error: {e}"),
            Error::CryptoKeyLength(len) => {
                write!(f, "expected a 32-byte secret key, got {len} bytes")
            },
            Error::Io(e) => write!(f, "voice connection io error: {e}"),
            Error::TimedOut => write!(f, "voice connection attempt timed out"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::TimedOut
    }
}

/// A [`std::result::Result`] defaulted to this module's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Everything needed to start sending voice data, handed back once a
/// handshake reaches `SESSION_DESCRIPTION`.
#[allow(missing_docs)]
pub struct EstablishedVoice {
    pub signaling: VoiceSignalingStateMachine,
    pub socket: UdpSocket,
    pub ssrc: u32,
    pub packetizer: RtpPacketizer,
    pub rtp_state: RtpSendState,
}

/// A milestone reached partway through [`connect`], reported via its
/// `on_phase` callback so a caller tracking connection-flow state (the
/// voice connection supervisor) never has a hidden intermediate state
/// between suspension points.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// The voice signaling WebSocket is up and `IDENTIFY` has been sent.
    WebsocketConnected,
    /// `READY` was received; `ssrc`/`port` are known but discovery hasn't
    /// run yet.
    WebsocketReady,
    /// IP discovery succeeded and `SELECT_PROTOCOL` has been sent.
    GotIpDiscovery,
}

/// Runs the full handshake described in [`crate::voice::signaling`]'s module
/// doc: connect, await `READY`, discover our public address, select the
/// protocol, and await `SESSION_DESCRIPTION`.
#[instrument(skip(session_id, token, on_phase))]
pub async fn connect(
    endpoint: &str,
    server_id: GuildId,
    user_id: UserId,
    session_id: String,
    token: String,
    resume: bool,
    mut on_phase: impl FnMut(Phase),
) -> Result<EstablishedVoice> {
    let mut signaling = VoiceSignalingStateMachine::connect(
        endpoint, server_id, user_id, session_id, token, resume,
    )
    .await?;
    on_phase(Phase::WebsocketConnected);

    let ready = loop {
        match signaling.poll_event().await? {
            PollOutcome::Ready(ready) => break ready,
            PollOutcome::Heartbeat => continue,
            PollOutcome::Timeout => continue,
            other => {
                tracing::debug!(?other, "unexpected event awaiting voice READY");
                continue;
            },
        }
    };
    on_phase(Phase::WebsocketReady);

    let remote: SocketAddr = (ready.ip.parse::<std::net::IpAddr>().map_err(|_| {
        Error::Discovery(udp::Error::InvalidAddress)
    })?, ready.port)
        .into();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;

    // This crate never receives RTP, so there's nothing to buffer on the way in.
    let socket = {
        let std_socket = socket.into_std()?;
        let socket2 = Socket::from(std_socket);
        #[cfg(not(target_os = "macos"))]
        socket2.set_recv_buffer_size(0)?;
        UdpSocket::from_std(socket2.into())?
    };

    socket.connect(remote).await?;

    let request = udp::build_request(ready.ssrc);
    socket.send(&request).await?;

    let mut reply = [0u8; crate::constants::IP_DISCOVERY_PACKET_LEN];
    let (len, _addr) = socket.recv_from(&mut reply).await?;
    let discovered = udp::parse_response(&reply[..len])?;

    signaling
        .select_protocol(discovered.address, discovered.port)
        .await?;
    on_phase(Phase::GotIpDiscovery);

    let secret_key = loop {
        match signaling.poll_event().await? {
            PollOutcome::SessionDescription(sd) => break sd.secret_key,
            PollOutcome::Heartbeat | PollOutcome::Timeout => continue,
            other => {
                tracing::debug!(?other, "unexpected event awaiting SESSION_DESCRIPTION");
                continue;
            },
        }
    };

    if secret_key.len() != crate::constants::SECRET_KEY_LEN {
        return Err(Error::CryptoKeyLength(secret_key.len()));
    }
    let cipher =
        Cipher::new_from_slice(&secret_key).map_err(|_| Error::CryptoKeyLength(secret_key.len()))?;

    signaling.speaking(ready.ssrc, true).await?;

    info!(ssrc = ready.ssrc, %endpoint, "voice connection established");

    Ok(EstablishedVoice {
        signaling,
        socket,
        ssrc: ready.ssrc,
        packetizer: RtpPacketizer::new(cipher),
        rtp_state: RtpSendState::new(ready.ssrc),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn crypto_key_length_error_names_the_bad_length() {
        let err = Error::CryptoKeyLength(16);
        assert_eq!(
            err.to_string(),
            "expected a 32-byte secret key, got 16 bytes"
        );
    }
}
