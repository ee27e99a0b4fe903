//! Cryptographic primitives for packet authentication
//!
//! - SipHash-2-4 keyed PRF with a bounded block loop (siphash)
//! - Packet tag construction and constant-time verification (mac)

pub mod mac;
pub mod siphash;

pub use mac::{compute_tag, verify_tag, MacKey, Tag};
