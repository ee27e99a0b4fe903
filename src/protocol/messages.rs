//! Mesh authentication wire format
//!
//! Every inbound mesh packet is a UDP datagram to the service port whose
//! payload starts with a fixed 30-byte authentication header. All multi-byte
//! integers are network byte order.
//!
//! ```text
//! session_id(16) | packet_seq(4) | mac(8) | payload_len(2) | payload(payload_len)
//! ```
//!
//! Parsing is pure validation: nothing here allocates or mutates state.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::crypto::mac::{Tag, MAC_HEADER_LEN, TAG_LEN};

/// Fixed UDP destination port of the mesh service
pub const MESH_PORT: u16 = 26970;

/// Largest payload a packet may announce (stays under common MTU minus headers)
pub const MAX_PAYLOAD_LEN: usize = 1400;

/// Session identifier length
pub const SESSION_ID_LEN: usize = 16;

/// Ethernet II header: dst(6) | src(6) | ethertype(2)
pub const ETH_HEADER_LEN: usize = 14;

/// IPv4 header without options
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// UDP header
pub const UDP_HEADER_LEN: usize = 8;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const IPPROTO_UDP: u8 = 17;

const _: () = assert!(MAX_PAYLOAD_LEN <= crate::crypto::siphash::MAX_INPUT_LEN);
const _: () = assert!(MAC_HEADER_LEN <= crate::crypto::siphash::MAX_INPUT_LEN);

/// Why a frame failed structural validation
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedPacket {
    #[error("frame too short for Ethernet/IPv4/UDP headers: {got} bytes")]
    TruncatedEnvelope { got: usize },

    #[error("not an IPv4 frame: ethertype {ethertype:#06x}")]
    NotIpv4 { ethertype: u16 },

    #[error("invalid IPv4 header: version/ihl byte {byte:#04x}")]
    BadIpHeader { byte: u8 },

    #[error("not UDP: IP protocol {protocol}")]
    NotUdp { protocol: u8 },

    #[error("wrong destination port {port}")]
    WrongPort { port: u16 },

    #[error("datagram too short for authentication header: {got} bytes")]
    TruncatedHeader { got: usize },

    #[error("announced payload length {len} exceeds maximum {max}", max = MAX_PAYLOAD_LEN)]
    PayloadTooLarge { len: usize },

    #[error("truncated payload: expected {expected} bytes, got {got}")]
    TruncatedPayload { expected: usize, got: usize },
}

/// 16-byte opaque session identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub [u8; SESSION_ID_LEN]);

impl SessionId {
    pub fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self)
    }
}

impl FromStr for SessionId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut id = [0u8; SESSION_ID_LEN];
        hex::decode_to_slice(s.trim(), &mut id)?;
        Ok(Self(id))
    }
}

/// Authentication header (30 bytes, followed by the payload)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthHeader {
    pub session_id: SessionId,
    pub packet_seq: u32,
    pub mac: Tag,
    pub payload_len: u16,
}

impl AuthHeader {
    /// Size of the authentication header
    pub const SIZE: usize = SESSION_ID_LEN + 4 + TAG_LEN + 2;

    /// Parse the header fields from the start of a datagram
    pub fn from_bytes(data: &[u8]) -> Result<Self, MalformedPacket> {
        if data.len() < Self::SIZE {
            return Err(MalformedPacket::TruncatedHeader { got: data.len() });
        }

        let mut session_id = [0u8; SESSION_ID_LEN];
        session_id.copy_from_slice(&data[0..16]);

        let packet_seq = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);

        let mut mac = [0u8; TAG_LEN];
        mac.copy_from_slice(&data[20..28]);

        let payload_len = u16::from_be_bytes([data[28], data[29]]);

        Ok(Self {
            session_id: SessionId(session_id),
            packet_seq,
            mac,
            payload_len,
        })
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..16].copy_from_slice(self.session_id.as_bytes());
        buf[16..20].copy_from_slice(&self.packet_seq.to_be_bytes());
        buf[20..28].copy_from_slice(&self.mac);
        buf[28..30].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// The authenticated header prefix: `session_id || packet_seq` as on the wire
    pub fn mac_input(&self) -> [u8; MAC_HEADER_LEN] {
        let mut buf = [0u8; MAC_HEADER_LEN];
        buf[..16].copy_from_slice(self.session_id.as_bytes());
        buf[16..].copy_from_slice(&self.packet_seq.to_be_bytes());
        buf
    }
}

/// A structurally valid authentication packet borrowed from a receive buffer
#[derive(Debug, Clone, Copy)]
pub struct AuthPacket<'a> {
    pub header: AuthHeader,
    /// Exactly `payload_len` bytes; trailing frame padding is excluded
    pub payload: &'a [u8],
}

impl<'a> AuthPacket<'a> {
    /// Validate a UDP datagram payload (authentication header onward)
    pub fn parse_datagram(data: &'a [u8]) -> Result<Self, MalformedPacket> {
        let header = AuthHeader::from_bytes(data)?;

        let len = header.payload_len as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(MalformedPacket::PayloadTooLarge { len });
        }

        let expected = AuthHeader::SIZE + len;
        if data.len() < expected {
            return Err(MalformedPacket::TruncatedPayload {
                expected,
                got: data.len(),
            });
        }

        Ok(Self {
            header,
            payload: &data[AuthHeader::SIZE..expected],
        })
    }

    /// Validate a raw Ethernet frame carrying IPv4/UDP to `service_port`
    pub fn parse_frame(frame: &'a [u8], service_port: u16) -> Result<Self, MalformedPacket> {
        let datagram = udp_payload(frame, service_port)?;
        Self::parse_datagram(datagram)
    }
}

/// Strip and check the Ethernet/IPv4/UDP envelope, returning the UDP payload
fn udp_payload(frame: &[u8], service_port: u16) -> Result<&[u8], MalformedPacket> {
    if frame.len() < ETH_HEADER_LEN + IPV4_MIN_HEADER_LEN + UDP_HEADER_LEN {
        return Err(MalformedPacket::TruncatedEnvelope { got: frame.len() });
    }

    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return Err(MalformedPacket::NotIpv4 { ethertype });
    }

    let ip = &frame[ETH_HEADER_LEN..];
    let version_ihl = ip[0];
    let ihl = (version_ihl & 0x0f) as usize * 4;
    if version_ihl >> 4 != 4 || ihl < IPV4_MIN_HEADER_LEN {
        return Err(MalformedPacket::BadIpHeader { byte: version_ihl });
    }

    let udp_start = ETH_HEADER_LEN + ihl;
    let payload_start = udp_start + UDP_HEADER_LEN;
    if frame.len() < payload_start {
        return Err(MalformedPacket::TruncatedEnvelope { got: frame.len() });
    }

    let protocol = ip[9];
    if protocol != IPPROTO_UDP {
        return Err(MalformedPacket::NotUdp { protocol });
    }

    let port = u16::from_be_bytes([frame[udp_start + 2], frame[udp_start + 3]]);
    if port != service_port {
        return Err(MalformedPacket::WrongPort { port });
    }

    Ok(&frame[payload_start..])
}

/// Build an authentication datagram from its parts
pub fn build_message(session_id: SessionId, packet_seq: u32, mac: Tag, payload: &[u8]) -> Vec<u8> {
    let header = AuthHeader {
        session_id,
        packet_seq,
        mac,
        payload_len: payload.len() as u16,
    };

    let mut buf = Vec::with_capacity(AuthHeader::SIZE + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Wrap a datagram in a minimal Ethernet/IPv4/UDP envelope
    pub(crate) fn wrap_frame(datagram: &[u8], dst_port: u16) -> Vec<u8> {
        let mut frame = Vec::with_capacity(42 + datagram.len());

        frame.extend_from_slice(&[0xff; 6]);
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        let total_len = (IPV4_MIN_HEADER_LEN + UDP_HEADER_LEN + datagram.len()) as u16;
        frame.push(0x45);
        frame.push(0);
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0x40, 0]);
        frame.push(64);
        frame.push(IPPROTO_UDP);
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&[10, 0, 0, 1]);
        frame.extend_from_slice(&[10, 0, 0, 2]);

        let udp_len = (UDP_HEADER_LEN + datagram.len()) as u16;
        frame.extend_from_slice(&40000u16.to_be_bytes());
        frame.extend_from_slice(&dst_port.to_be_bytes());
        frame.extend_from_slice(&udp_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);

        frame.extend_from_slice(datagram);
        frame
    }
}
