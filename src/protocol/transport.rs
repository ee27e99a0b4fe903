//! Sender-side packet sealing
//!
//! Builds authentication datagrams the way peers put them on the wire. The
//! admission gate is the receiving half of this.

use crate::crypto::mac::{compute_tag, MacKey};
use crate::error::CryptoError;
use crate::protocol::messages::{build_message, AuthHeader, MalformedPacket, SessionId, MAX_PAYLOAD_LEN};

/// Seal a payload for transport
///
/// # Arguments
/// * `session_id` - Session the receiver knows us by
/// * `packet_seq` - Per-session sequence number (must increase per packet)
/// * `mac_key` - 16-byte session MAC key
/// * `payload` - Opaque ciphertext, at most 1400 bytes
///
/// # Returns
/// Complete authentication datagram ready to send to the mesh port
pub fn seal_packet(
    session_id: SessionId,
    packet_seq: u32,
    mac_key: &MacKey,
    payload: &[u8],
) -> Result<Vec<u8>, SealError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(SealError::Malformed(MalformedPacket::PayloadTooLarge {
            len: payload.len(),
        }));
    }

    let header = AuthHeader {
        session_id,
        packet_seq,
        mac: [0u8; 8],
        payload_len: payload.len() as u16,
    };
    let tag = compute_tag(mac_key, &header.mac_input(), payload)?;

    Ok(build_message(session_id, packet_seq, tag, payload))
}

/// Why a packet could not be sealed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SealError {
    #[error(transparent)]
    Malformed(#[from] MalformedPacket),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Per-session sender: owns the key and the next sequence number
#[derive(Debug)]
pub struct PacketSealer {
    session_id: SessionId,
    mac_key: MacKey,
    next_seq: u32,
}

impl PacketSealer {
    pub fn new(session_id: SessionId, mac_key: MacKey) -> Self {
        Self {
            session_id,
            mac_key,
            next_seq: 0,
        }
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Seal the next packet and advance the sequence number
    pub fn seal(&mut self, payload: &[u8]) -> Result<Vec<u8>, SealError> {
        let packet = seal_packet(self.session_id, self.next_seq, &self.mac_key, payload)?;
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::mac::verify_tag;
    use crate::protocol::messages::AuthPacket;

    #[test]
    fn test_sealed_packet_verifies() {
        let key = MacKey::new([3u8; 16]);
        let msg = seal_packet(SessionId([1u8; 16]), 12, &key, b"ciphertext").unwrap();

        let packet = AuthPacket::parse_datagram(&msg).unwrap();
        assert_eq!(packet.header.packet_seq, 12);
        assert_eq!(packet.payload, b"ciphertext");
        assert!(verify_tag(&key, &packet.header.mac_input(), packet.payload, &packet.header.mac).unwrap());
    }

    #[test]
    fn test_seal_rejects_oversized_payload() {
        let key = MacKey::new([3u8; 16]);
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            seal_packet(SessionId([1u8; 16]), 0, &key, &payload),
            Err(SealError::Malformed(MalformedPacket::PayloadTooLarge {
                len: MAX_PAYLOAD_LEN + 1
            }))
        );
    }

    #[test]
    fn test_sealer_counts_up() {
        let mut sealer = PacketSealer::new(SessionId([2u8; 16]), MacKey::new([4u8; 16]));
        let first = sealer.seal(b"a").unwrap();
        let second = sealer.seal(b"b").unwrap();

        assert_eq!(AuthPacket::parse_datagram(&first).unwrap().header.packet_seq, 0);
        assert_eq!(AuthPacket::parse_datagram(&second).unwrap().header.packet_seq, 1);
        assert_eq!(sealer.next_seq(), 2);
    }
}
