//! Packet admission policy
//!
//! Every inbound packet gets exactly one terminal decision, evaluated in a
//! fixed order:
//!
//! ```text
//! codec -> session exists -> verified -> not expired -> not replayed -> MAC
//! ```
//!
//! Cheap checks run before the MAC. Expiry and replay are only meaningful
//! once a verified session has been resolved, so they never run earlier.
//! A dropped packet mutates nothing except its outcome counter; an admitted
//! packet advances the session's replay floor to `packet_seq + 1`.
//!
//! Drops are silent. Nothing is ever sent back to the sender, so a prober
//! cannot learn which check failed.

use std::sync::Arc;

use thiserror::Error;

use crate::crypto::mac::verify_tag;
use crate::protocol::messages::{AuthPacket, MalformedPacket, SessionId, MESH_PORT};
use crate::protocol::session::{SessionStore, DEFAULT_IDLE_TIMEOUT_SECS};
use crate::protocol::stats::{FilterStats, Outcome};

/// Tunables for the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    /// UDP destination port mesh frames must be addressed to
    pub service_port: u16,
    /// Sessions idle strictly longer than this many seconds are rejected
    pub idle_timeout: u64,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            service_port: MESH_PORT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

/// Why a packet was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed(MalformedPacket),
    NoSession,
    Unverified,
    Expired,
    Replayed,
    AuthFailed,
}

impl DropReason {
    pub fn outcome(&self) -> Outcome {
        match self {
            DropReason::Malformed(_) => Outcome::Malformed,
            DropReason::NoSession => Outcome::NoSession,
            DropReason::Unverified => Outcome::Unverified,
            DropReason::Expired => Outcome::Expired,
            DropReason::Replayed => Outcome::Replayed,
            DropReason::AuthFailed => Outcome::AuthFailed,
        }
    }

    /// Coarse classification; an unverified session counts as no session
    pub fn rejection(&self) -> Rejection {
        match self {
            DropReason::Malformed(_) => Rejection::MalformedPacket,
            DropReason::NoSession | DropReason::Unverified => Rejection::NoSession,
            DropReason::Expired => Rejection::ExpiredSession,
            DropReason::Replayed => Rejection::ReplayedPacket,
            DropReason::AuthFailed => Rejection::AuthenticationFailure,
        }
    }
}

/// Rejection taxonomy
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("malformed packet")]
    MalformedPacket,

    #[error("no verified session")]
    NoSession,

    #[error("session expired")]
    ExpiredSession,

    #[error("replayed packet")]
    ReplayedPacket,

    #[error("authentication failure")]
    AuthenticationFailure,
}

/// A packet cleared for the decryption stage. `payload` borrows the receive
/// buffer untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted<'a> {
    pub session_id: SessionId,
    pub packet_seq: u32,
    pub peer_identity_hash: u64,
    pub payload: &'a [u8],
}

/// Result of one admission decision
pub type Verdict<'a> = Result<Admitted<'a>, DropReason>;

/// The admission gate: session table, counters, policy
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    sessions: Arc<SessionStore>,
    stats: Arc<FilterStats>,
    policy: GatePolicy,
}

impl AdmissionGate {
    pub fn new(sessions: Arc<SessionStore>, stats: Arc<FilterStats>, policy: GatePolicy) -> Self {
        Self {
            sessions,
            stats,
            policy,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn stats(&self) -> &Arc<FilterStats> {
        &self.stats
    }

    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    /// Decide on a raw Ethernet frame
    pub fn admit_frame<'a>(&self, frame: &'a [u8], now: u64) -> Verdict<'a> {
        let parsed = AuthPacket::parse_frame(frame, self.policy.service_port);
        self.record(parsed.map_err(DropReason::Malformed).and_then(|p| self.check(p, now)))
    }

    /// Decide on a UDP datagram already delivered to the service port
    pub fn admit_datagram<'a>(&self, datagram: &'a [u8], now: u64) -> Verdict<'a> {
        let parsed = AuthPacket::parse_datagram(datagram);
        self.record(parsed.map_err(DropReason::Malformed).and_then(|p| self.check(p, now)))
    }

    fn record<'a>(&self, verdict: Verdict<'a>) -> Verdict<'a> {
        match &verdict {
            Ok(_) => self.stats.increment(Outcome::Admitted),
            Err(reason) => {
                self.stats.increment(reason.outcome());
                tracing::trace!(reason = ?reason, "Packet dropped");
            }
        }
        verdict
    }

    fn check<'a>(&self, packet: AuthPacket<'a>, now: u64) -> Verdict<'a> {
        let header = &packet.header;

        let session = self
            .sessions
            .lookup(&header.session_id)
            .ok_or(DropReason::NoSession)?;

        if !session.is_verified() {
            return Err(DropReason::Unverified);
        }

        if session.is_expired(now, self.policy.idle_timeout) {
            return Err(DropReason::Expired);
        }

        if !session.accepts_seq(header.packet_seq) {
            return Err(DropReason::Replayed);
        }

        let authentic = verify_tag(
            session.mac_key(),
            &header.mac_input(),
            packet.payload,
            &header.mac,
        )
        .map_err(|_| {
            DropReason::Malformed(MalformedPacket::PayloadTooLarge {
                len: packet.payload.len(),
            })
        })?;
        if !authentic {
            return Err(DropReason::AuthFailed);
        }

        // Commit: only the packet whose CAS lands on the floor it checked wins
        session
            .advance(header.packet_seq, now)
            .map_err(|_| DropReason::Replayed)?;

        Ok(Admitted {
            session_id: header.session_id,
            packet_seq: header.packet_seq,
            peer_identity_hash: session.peer_identity_hash,
            payload: packet.payload,
        })
    }
}
