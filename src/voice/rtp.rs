//! RTP packet framing for outbound voice traffic.
//!
//! Grounded on `VoiceClient._get_voice_packet` in `voice_client.py`: a
//! 12-byte header (`0x80, 0x78`, big-endian sequence/timestamp/ssrc)
//! immediately followed by the xsalsa20_poly1305 ciphertext, using the
//! header bytes themselves as the nonce.

use super::crypto;
use crate::constants::RTP_VERSION;

use crypto_secretbox::XSalsa20Poly1305 as Cipher;
use discortp::rtp::{MutableRtpPacket, RtpPacket, RtpType};
use std::num::Wrapping;

/// Mutable per-connection RTP send state: the monotonically increasing
/// (and intentionally wrapping) sequence number and sample timestamp.
#[derive(Clone, Copy, Debug)]
#[allow(missing_docs)]
pub struct RtpSendState {
    pub sequence: Wrapping<u16>,
    pub timestamp: Wrapping<u32>,
    pub ssrc: u32,
}

impl RtpSendState {
    /// Starts a new send state with a randomised sequence/timestamp, as
    /// Discord's own clients do to avoid leaking connection age/traffic
    /// volume to on-path observers.
    pub fn new(ssrc: u32) -> Self {
        Self {
            sequence: Wrapping(rand::random()),
            timestamp: Wrapping(rand::random()),
            ssrc,
        }
    }

    /// Advances the sequence number by one frame and the timestamp by the
    /// number of samples that frame represents, wrapping on overflow.
    pub fn advance(&mut self, samples_per_frame: u32) {
        self.sequence += Wrapping(1);
        self.timestamp += Wrapping(samples_per_frame);
    }
}

/// Builds and encrypts outbound RTP packets from encoded Opus frames.
pub struct RtpPacketizer {
    cipher: Cipher,
}

impl RtpPacketizer {
    /// Wraps an already-negotiated cipher key.
    pub fn new(cipher: Cipher) -> Self {
        Self { cipher }
    }

    /// Number of extra bytes (header + auth tag) added to every Opus frame.
    pub const fn overhead() -> usize {
        RtpPacket::minimum_packet_size() + crypto::TAG_SIZE
    }

    /// Writes a complete, encrypted RTP packet for `opus_payload` into
    /// `out`, returning the packet's total length.
    ///
    /// `out` must be at least [`RtpPacketizer::overhead`] `+
    /// opus_payload.len()` bytes.
    pub fn packetize(
        &self,
        state: &RtpSendState,
        opus_payload: &[u8],
        out: &mut [u8],
    ) -> Result<usize, crypto_secretbox::Error> {
        let header_len = RtpPacket::minimum_packet_size();
        let total_len = Self::overhead() + opus_payload.len();
        assert!(
            out.len() >= total_len,
            "caller must supply a buffer sized to RtpPacketizer::overhead() + payload length"
        );

        {
            let mut header =
                MutableRtpPacket::new(&mut out[..header_len]).expect("buffer sized above");
            header.set_version(RTP_VERSION);
            header.set_payload_type(RtpType::Dynamic(120));
            header.set_sequence(state.sequence.0.into());
            header.set_timestamp(state.timestamp.0.into());
            header.set_ssrc(state.ssrc);
        }

        out[header_len + crypto::TAG_SIZE..total_len].copy_from_slice(opus_payload);

        let mut pkt = MutableRtpPacket::new(&mut out[..total_len]).expect("buffer sized above");
        crypto::encrypt_in_place(&mut pkt, &self.cipher, crypto::TAG_SIZE + opus_payload.len())?;

        Ok(total_len)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crypto_secretbox::KeyInit;

    #[test]
    fn sequence_and_timestamp_wrap_instead_of_panicking() {
        let mut state = RtpSendState {
            sequence: Wrapping(u16::MAX),
            timestamp: Wrapping(u32::MAX),
            ssrc: 1,
        };
        state.advance(960);
        assert_eq!(state.sequence, Wrapping(0));
        assert_eq!(state.timestamp, Wrapping(959));
    }

    #[test]
    fn packetize_writes_expected_header_fields() {
        let cipher = Cipher::new_from_slice(&[3u8; 32]).unwrap();
        let packetizer = RtpPacketizer::new(cipher);
        let state = RtpSendState {
            sequence: Wrapping(7),
            timestamp: Wrapping(960),
            ssrc: 0xdead_beef,
        };

        let payload = [9u8; 20];
        let mut out = vec![0u8; RtpPacketizer::overhead() + payload.len()];
        let len = packetizer.packetize(&state, &payload, &mut out).unwrap();
        assert_eq!(len, out.len());

        assert_eq!(out[0], 0x80);
        assert_eq!(out[1], 0x78);
        assert_eq!(u16::from_be_bytes([out[2], out[3]]), 7);
        assert_eq!(u32::from_be_bytes([out[4], out[5], out[6], out[7]]), 960);
        assert_eq!(
            u32::from_be_bytes([out[8], out[9], out[10], out[11]]),
            0xdead_beef
        );
    }
}
