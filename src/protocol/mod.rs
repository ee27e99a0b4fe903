//! Mesh packet authentication protocol
//!
//! This module contains the fast-path components:
//! - Authentication header wire format
//! - Session table
//! - Admission policy
//! - Outcome counters
//! - Sender-side sealing

pub mod admission;
pub mod messages;
pub mod session;
pub mod stats;
pub mod transport;

pub use admission::{AdmissionGate, Admitted, DropReason, GatePolicy, Rejection, Verdict};
pub use messages::{AuthHeader, AuthPacket, MalformedPacket, SessionId, MAX_PAYLOAD_LEN, MESH_PORT};
pub use session::{unix_now, Session, SessionStore, SessionSummary};
pub use stats::{FilterStats, Outcome, StatsSnapshot};
pub use transport::{seal_packet, PacketSealer, SealError};
