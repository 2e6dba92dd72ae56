//! xsalsa20_poly1305 ("Normal" mode) RTP payload encryption.
//!
//! Only the header-as-nonce scheme is implemented here: Discord also offers
//! `_suffix` and `_lite` variants, but this crate negotiates and speaks
//! `xsalsa20_poly1305` exclusively, so there is exactly one nonce layout to
//! get right.

use crypto_secretbox::{AeadInPlace, Error as CryptoError, Nonce, SecretBox, Tag, XSalsa20Poly1305 as Cipher};
use discortp::{rtp::RtpPacket, MutablePacket};

/// The name Discord expects during `SELECT_PROTOCOL` negotiation.
pub const MODE_NAME: &str = "xsalsa20_poly1305";

/// Size in bytes of the Poly1305 authentication tag appended to each payload.
pub const TAG_SIZE: usize = SecretBox::<()>::TAG_SIZE;
/// Size in bytes of the nonce, equal to the RTP header length it's drawn from.
pub const NONCE_SIZE: usize = SecretBox::<()>::NONCE_SIZE;

/// Extracts the header (used verbatim as nonce bytes) and the mutable body
/// slice of an RTP packet.
fn split_header_and_body(packet: &mut impl MutablePacket) -> (&[u8], &mut [u8]) {
    let header_len = packet.packet().len() - packet.payload().len();
    packet.packet_mut().split_at_mut(header_len)
}

/// Decrypts a Discord RTP packet in place using the given key.
///
/// On success, returns the number of prefix bytes (the authentication tag)
/// to skip to reach the plaintext Opus payload.
pub fn decrypt_in_place(
    packet: &mut impl MutablePacket,
    cipher: &Cipher,
) -> Result<usize, CryptoError> {
    let (header, body) = split_header_and_body(packet);

    let mut nonce = Nonce::default();
    let header_nonce_len = RtpPacket::minimum_packet_size().min(header.len());
    nonce[..header_nonce_len].copy_from_slice(&header[..header_nonce_len]);

    if body.len() < TAG_SIZE {
        return Err(CryptoError);
    }

    let (tag_bytes, data_bytes) = body.split_at_mut(TAG_SIZE);
    let tag = Tag::from_slice(tag_bytes);

    cipher
        .decrypt_in_place_detached(&nonce, b"", data_bytes, tag)
        .map(|()| TAG_SIZE)
}

/// Encrypts `payload_len` bytes of the packet body (header-as-nonce mode),
/// writing the authentication tag immediately after the header.
pub fn encrypt_in_place(
    packet: &mut impl MutablePacket,
    cipher: &Cipher,
    payload_len: usize,
) -> Result<(), CryptoError> {
    let (header, body) = split_header_and_body(packet);
    let body = &mut body[..payload_len];

    let mut nonce = Nonce::default();
    let header_nonce_len = RtpPacket::minimum_packet_size().min(header.len());
    nonce[..header_nonce_len].copy_from_slice(&header[..header_nonce_len]);

    let tag = cipher.encrypt_in_place_detached(&nonce, b"", &mut body[TAG_SIZE..])?;
    body[..TAG_SIZE].copy_from_slice(&tag[..]);

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crypto_secretbox::KeyInit;
    use discortp::rtp::MutableRtpPacket;

    const KEY_SIZE: usize = SecretBox::<()>::KEY_SIZE;

    #[test]
    fn small_packet_decrypts_error() {
        let mut buf = [0u8; MutableRtpPacket::minimum_packet_size()];
        let mut pkt = MutableRtpPacket::new(&mut buf[..]).unwrap();
        let cipher = Cipher::new_from_slice(&[1u8; KEY_SIZE]).unwrap();

        assert!(decrypt_in_place(&mut pkt, &cipher).is_err());
    }

    #[test]
    fn symmetric_encrypt_decrypt_round_trips_payload() {
        const TRUE_PAYLOAD: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut buf = [0u8; MutableRtpPacket::minimum_packet_size() + TRUE_PAYLOAD.len() + TAG_SIZE];
        let cipher = Cipher::new_from_slice(&[7u8; KEY_SIZE]).unwrap();

        let mut pkt = MutableRtpPacket::new(&mut buf[..]).unwrap();
        let payload = pkt.payload_mut();
        payload[TAG_SIZE..TAG_SIZE + TRUE_PAYLOAD.len()].copy_from_slice(&TRUE_PAYLOAD);

        let payload_len = TAG_SIZE + TRUE_PAYLOAD.len();
        assert!(encrypt_in_place(&mut pkt, &cipher, payload_len).is_ok());

        let final_len = MutableRtpPacket::minimum_packet_size() + payload_len;
        let mut pkt = MutableRtpPacket::new(&mut buf[..final_len]).unwrap();
        let skip = decrypt_in_place(&mut pkt, &cipher).unwrap();
        assert_eq!(&pkt.payload()[skip..], &TRUE_PAYLOAD[..]);
    }
}
