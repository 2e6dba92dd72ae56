//! UDP IP discovery ("NAT punching") request/response framing.
//!
//! Grounded on `VoiceClient.initial_connection`'s discovery exchange in
//! `gateway.py`/`voice_client.py`: a fixed 70-byte packet, built with
//! `discortp`'s generated accessors for everything except the port field,
//! which Discord encodes little-endian -- a one-off inconsistency with the
//! rest of the (big-endian) RTP/discovery wire format that must be matched
//! exactly rather than "fixed".

use crate::constants::IP_DISCOVERY_PACKET_LEN;

use discortp::discord::{IpDiscoveryPacket, IpDiscoveryType, MutableIpDiscoveryPacket};
use std::{
    error::Error as StdError,
    fmt,
    net::IpAddr,
    str::FromStr,
};

/// Errors while building or parsing an IP discovery exchange.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Fewer than [`IP_DISCOVERY_PACKET_LEN`] bytes were received.
    ShortPacket,
    /// The packet's framing (type/length fields) didn't parse.
    Malformed,
    /// The response's `pkt_type` was not [`IpDiscoveryType::Response`].
    UnexpectedType,
    /// The address field had no NUL terminator, or was not valid UTF-8/IP.
    InvalidAddress,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ShortPacket => write!(f, "discovery response shorter than 70 bytes"),
            Error::Malformed => write!(f, "discovery response was malformed"),
            Error::UnexpectedType => write!(f, "discovery response had the wrong packet type"),
            Error::InvalidAddress => write!(f, "discovery response contained an invalid address"),
        }
    }
}

impl StdError for Error {}

/// The externally-visible address/port Discord observed for our UDP socket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiscoveryResponse {
    /// The address Discord observed our discovery request arrive from.
    pub address: IpAddr,
    /// The port Discord observed our discovery request arrive from.
    pub port: u16,
}

/// Builds the 70-byte IP discovery request packet for the given SSRC.
pub fn build_request(ssrc: u32) -> [u8; IP_DISCOVERY_PACKET_LEN] {
    let mut buf = [0u8; IP_DISCOVERY_PACKET_LEN];
    {
        let mut pkt = MutableIpDiscoveryPacket::new(&mut buf[..])
            .expect("buffer is exactly IP_DISCOVERY_PACKET_LEN bytes");
        pkt.set_pkt_type(IpDiscoveryType::Request);
        pkt.set_length((IP_DISCOVERY_PACKET_LEN - 4) as u16);
        pkt.set_ssrc(ssrc);
    }
    buf
}

/// Parses a discovery response, extracting the observed address and port.
pub fn parse_response(buf: &[u8]) -> Result<DiscoveryResponse, Error> {
    if buf.len() < IP_DISCOVERY_PACKET_LEN {
        return Err(Error::ShortPacket);
    }

    let pkt = IpDiscoveryPacket::new(buf).ok_or(Error::Malformed)?;
    if pkt.get_pkt_type() != IpDiscoveryType::Response {
        return Err(Error::UnexpectedType);
    }

    let addr_raw = pkt.get_address_raw();
    let nul = addr_raw
        .iter()
        .position(|&b| b == 0)
        .ok_or(Error::InvalidAddress)?;
    let ip_str = std::str::from_utf8(&addr_raw[..nul]).map_err(|_| Error::InvalidAddress)?;
    let address = IpAddr::from_str(ip_str).map_err(|_| Error::InvalidAddress)?;

    // Little-endian, unlike every other multi-byte field in this packet.
    let port = u16::from_le_bytes([
        buf[IP_DISCOVERY_PACKET_LEN - 2],
        buf[IP_DISCOVERY_PACKET_LEN - 1],
    ]);

    Ok(DiscoveryResponse { address, port })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_carries_ssrc_and_type() {
        let buf = build_request(0x1234_5678);
        let pkt = IpDiscoveryPacket::new(&buf).unwrap();
        assert_eq!(pkt.get_pkt_type(), IpDiscoveryType::Request);
        assert_eq!(pkt.get_ssrc(), 0x1234_5678);
    }

    #[test]
    fn response_round_trips_address_and_little_endian_port() {
        let mut buf = [0u8; IP_DISCOVERY_PACKET_LEN];
        {
            let mut pkt = MutableIpDiscoveryPacket::new(&mut buf[..]).unwrap();
            pkt.set_pkt_type(IpDiscoveryType::Response);
            pkt.set_length((IP_DISCOVERY_PACKET_LEN - 4) as u16);
            pkt.set_ssrc(42);
            let addr_field = pkt.get_address_raw_mut();
            addr_field[..9].copy_from_slice(b"192.0.2.1");
        }
        // Port 443, little-endian.
        buf[IP_DISCOVERY_PACKET_LEN - 2] = 0xBB;
        buf[IP_DISCOVERY_PACKET_LEN - 1] = 0x01;

        let resp = parse_response(&buf).unwrap();
        assert_eq!(resp.address, "192.0.2.1".parse::<IpAddr>().unwrap());
        assert_eq!(resp.port, 443);
    }

    #[test]
    fn short_packet_is_rejected() {
        assert!(matches!(parse_response(&[0; 10]), Err(Error::ShortPacket)));
    }
}
