//! Session table for packet admission
//!
//! Rows are installed and revoked by the handshake service; the admission
//! path only reads them and advances `last_activity`/`replay_floor` on
//! admitted packets. The table has a fixed capacity: installing into a full
//! table fails instead of evicting a live session, since dropping valid
//! authentication state would reopen its replay window.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use serde::Serialize;

use crate::crypto::MacKey;
use crate::error::SessionError;
use crate::protocol::messages::SessionId;

/// Idle sessions older than this many seconds are rejected
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3600;

/// Default number of rows in the session table
pub const DEFAULT_SESSION_CAPACITY: usize = 65536;

/// Current wall-clock time in whole seconds since the Unix epoch
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Authenticated session state for one peer
#[derive(Debug)]
pub struct Session {
    mac_key: MacKey,
    /// Hash of the peer's authenticated identity (informational)
    pub peer_identity_hash: u64,
    verified: AtomicBool,
    last_activity: AtomicU64,
    /// Smallest sequence number accepted next; never decreases
    replay_floor: AtomicU64,
}

impl Session {
    fn new(mac_key: MacKey, peer_identity_hash: u64, verified: bool, now: u64) -> Self {
        Self {
            mac_key,
            peer_identity_hash,
            verified: AtomicBool::new(verified),
            last_activity: AtomicU64::new(now),
            replay_floor: AtomicU64::new(0),
        }
    }

    pub fn mac_key(&self) -> &MacKey {
        &self.mac_key
    }

    pub fn is_verified(&self) -> bool {
        self.verified.load(Ordering::Acquire)
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Acquire)
    }

    pub fn replay_floor(&self) -> u64 {
        self.replay_floor.load(Ordering::Acquire)
    }

    /// Idle for strictly longer than `idle_timeout` seconds
    pub fn is_expired(&self, now: u64, idle_timeout: u64) -> bool {
        now.saturating_sub(self.last_activity()) > idle_timeout
    }

    /// Would `seq` pass the replay check right now
    pub fn accepts_seq(&self, seq: u32) -> bool {
        u64::from(seq) >= self.replay_floor()
    }

    /// Advance the replay floor to `seq + 1` and refresh `last_activity`.
    ///
    /// Compare-and-swap against the floor that was read: succeeds only if
    /// `seq` is still at or above the floor when the swap lands, so two
    /// concurrent packets can never both claim the same window. On failure
    /// nothing changes and the current floor is returned.
    pub fn advance(&self, seq: u32, now: u64) -> Result<(), u64> {
        let next = u64::from(seq) + 1;
        let mut floor = self.replay_floor.load(Ordering::Acquire);
        loop {
            if next <= floor {
                return Err(floor);
            }
            match self.replay_floor.compare_exchange_weak(
                floor,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.last_activity.fetch_max(now, Ordering::AcqRel);
                    return Ok(());
                }
                Err(current) => floor = current,
            }
        }
    }

    fn summary(&self, session_id: SessionId) -> SessionSummary {
        SessionSummary {
            session_id: session_id.to_string(),
            peer_identity_hash: self.peer_identity_hash,
            verified: self.is_verified(),
            last_activity: self.last_activity(),
            replay_floor: self.replay_floor(),
        }
    }
}

/// Key-free view of a session row for the control API
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub peer_identity_hash: u64,
    pub verified: bool,
    pub last_activity: u64,
    pub replay_floor: u64,
}

/// Fixed-capacity concurrent session table
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
    capacity: usize,
    len: AtomicUsize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY)
    }
}

impl SessionStore {
    /// Create a table that holds at most `capacity` rows
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: DashMap::with_capacity(capacity),
            capacity,
            len: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Install a fully verified session (`replay_floor = 0`, `last_activity = now`)
    pub fn install(
        &self,
        session_id: SessionId,
        mac_key: MacKey,
        peer_identity_hash: u64,
        now: u64,
    ) -> Result<(), SessionError> {
        self.insert(session_id, Session::new(mac_key, peer_identity_hash, true, now))?;
        tracing::info!(session = %session_id, peer = peer_identity_hash, "Session installed");
        Ok(())
    }

    /// Install a session whose handshake has not finished; it is rejected
    /// by admission until [`SessionStore::mark_verified`] is called
    pub fn install_pending(
        &self,
        session_id: SessionId,
        mac_key: MacKey,
        peer_identity_hash: u64,
        now: u64,
    ) -> Result<(), SessionError> {
        self.insert(session_id, Session::new(mac_key, peer_identity_hash, false, now))?;
        tracing::info!(session = %session_id, peer = peer_identity_hash, "Pending session installed");
        Ok(())
    }

    fn insert(&self, session_id: SessionId, session: Session) -> Result<(), SessionError> {
        match self.sessions.entry(session_id) {
            Entry::Occupied(_) => Err(SessionError::DuplicateSession {
                session_id: session_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let capacity = self.capacity;
                self.len
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < capacity).then_some(n + 1)
                    })
                    .map_err(|_| {
                        tracing::warn!(capacity, "Session table full, install rejected");
                        SessionError::CapacityExhausted { capacity }
                    })?;
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Complete a pending session's handshake
    pub fn mark_verified(&self, session_id: &SessionId, now: u64) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SessionError::UnknownSession {
                session_id: session_id.to_string(),
            })?;
        session.last_activity.fetch_max(now, Ordering::AcqRel);
        session.verified.store(true, Ordering::Release);
        tracing::info!(session = %session_id, "Session verified");
        Ok(())
    }

    /// Remove a session row
    pub fn revoke(&self, session_id: &SessionId) -> Result<(), SessionError> {
        match self.sessions.remove(session_id) {
            Some(_) => {
                self.len.fetch_sub(1, Ordering::AcqRel);
                tracing::info!(session = %session_id, "Session revoked");
                Ok(())
            }
            None => Err(SessionError::UnknownSession {
                session_id: session_id.to_string(),
            }),
        }
    }

    /// Look up a session row. The returned guard holds a shard read lock;
    /// drop it before installing or revoking on the same thread.
    pub fn lookup(&self, session_id: &SessionId) -> Option<Ref<'_, SessionId, Session>> {
        self.sessions.get(session_id)
    }

    /// Record an admitted packet: `replay_floor = new_seq + 1`, `last_activity = now`.
    ///
    /// Returns `false` (and changes nothing) if the session is gone or the
    /// floor has already moved past `new_seq`.
    pub fn touch(&self, session_id: &SessionId, new_seq: u32, now: u64) -> bool {
        self.sessions
            .get(session_id)
            .map_or(false, |session| session.advance(new_seq, now).is_ok())
    }

    /// Remove every row idle for strictly longer than `idle_timeout`
    pub fn sweep_expired(&self, now: u64, idle_timeout: u64) -> usize {
        let mut removed = 0;
        self.sessions.retain(|id, session| {
            let keep = !session.is_expired(now, idle_timeout);
            if !keep {
                tracing::debug!(session = %id, "Sweeping expired session");
                // Slot is released per row, before the next shard is walked
                self.len.fetch_sub(1, Ordering::AcqRel);
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            tracing::info!(removed, remaining = self.len(), "Expired sessions swept");
        }
        removed
    }

    /// Key-free summaries of every row, ordered by session id
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut rows: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| entry.value().summary(*entry.key()))
            .collect();
        rows.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        rows
    }
}
