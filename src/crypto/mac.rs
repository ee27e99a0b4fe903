//! Packet authentication tag
//!
//! The tag over a packet is `H(header) ^ H(payload)`, where `H` is
//! SipHash-2-4 under the session's MAC key, `header` is the 20 bytes
//! `session_id || packet_seq` exactly as they appear on the wire, and the
//! payload term is omitted for an empty payload. The 64-bit result is carried
//! on the wire in little-endian byte order.
//!
//! This is not a single-pass MAC over the concatenated message. It must stay
//! bit-compatible with the handshake and decryption services that produce and
//! expect these tags. Flag it in any security review: XOR of two keyed PRF
//! outputs is not known to be as strong as one MAC over the whole message.

use std::fmt;

use subtle::ConstantTimeEq;

use crate::crypto::siphash::{self, KEY_LEN};
use crate::error::CryptoError;

/// Tag length on the wire
pub const TAG_LEN: usize = 8;

/// Length of the authenticated header prefix: session_id(16) || packet_seq(4)
pub const MAC_HEADER_LEN: usize = 20;

/// Truncated authentication tag as carried on the wire
pub type Tag = [u8; TAG_LEN];

/// 128-bit per-session MAC key derived by the handshake service.
///
/// `Debug` is redacted so keys never reach logs.
#[derive(Clone, PartialEq, Eq)]
pub struct MacKey([u8; KEY_LEN]);

impl MacKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MacKey(<redacted>)")
    }
}

/// Compute the packet tag over `header` and `payload`
pub fn compute_tag(
    key: &MacKey,
    header: &[u8; MAC_HEADER_LEN],
    payload: &[u8],
) -> Result<Tag, CryptoError> {
    let mut tag = siphash::siphash24(key.as_bytes(), header)?;
    if !payload.is_empty() {
        tag ^= siphash::siphash24(key.as_bytes(), payload)?;
    }
    Ok(tag.to_le_bytes())
}

/// Constant-time tag comparison
pub fn tags_equal(computed: &Tag, received: &Tag) -> bool {
    computed.ct_eq(received).into()
}

/// Recompute the tag and compare it against `received` in constant time
pub fn verify_tag(
    key: &MacKey,
    header: &[u8; MAC_HEADER_LEN],
    payload: &[u8],
    received: &Tag,
) -> Result<bool, CryptoError> {
    let computed = compute_tag(key, header, payload)?;
    Ok(tags_equal(&computed, received))
}
