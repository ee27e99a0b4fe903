//! Per-outcome admission counters
//!
//! One monotonic counter per admission outcome. Counters are updated with a
//! relaxed atomic add from any receive context and are only read from the
//! outside; there is no reset.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Terminal outcome of one admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Admitted,
    Malformed,
    NoSession,
    Unverified,
    Expired,
    Replayed,
    AuthFailed,
}

impl Outcome {
    pub const ALL: [Outcome; 7] = [
        Outcome::Admitted,
        Outcome::Malformed,
        Outcome::NoSession,
        Outcome::Unverified,
        Outcome::Expired,
        Outcome::Replayed,
        Outcome::AuthFailed,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Admitted => "admitted",
            Outcome::Malformed => "malformed",
            Outcome::NoSession => "no_session",
            Outcome::Unverified => "unverified",
            Outcome::Expired => "expired",
            Outcome::Replayed => "replayed",
            Outcome::AuthFailed => "auth_failed",
        }
    }
}

/// Keeps each counter on its own cache line so cores don't contend
#[repr(align(128))]
#[derive(Debug, Default)]
struct CachePadded(AtomicU64);

/// Shared admission counters
#[derive(Debug, Default)]
pub struct FilterStats {
    counters: [CachePadded; 7],
}

impl FilterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, outcome: Outcome) {
        self.counters[outcome.index()].0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, outcome: Outcome) -> u64 {
        self.counters[outcome.index()].0.load(Ordering::Relaxed)
    }

    /// Total decisions made
    pub fn total(&self) -> u64 {
        Outcome::ALL.iter().map(|&o| self.get(o)).sum()
    }

    /// Point-in-time copy for export
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            admitted: self.get(Outcome::Admitted),
            malformed: self.get(Outcome::Malformed),
            no_session: self.get(Outcome::NoSession),
            unverified: self.get(Outcome::Unverified),
            expired: self.get(Outcome::Expired),
            replayed: self.get(Outcome::Replayed),
            auth_failed: self.get(Outcome::AuthFailed),
        }
    }
}

/// Serializable counter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub admitted: u64,
    pub malformed: u64,
    pub no_session: u64,
    pub unverified: u64,
    pub expired: u64,
    pub replayed: u64,
    pub auth_failed: u64,
}

impl StatsSnapshot {
    pub fn dropped(&self) -> u64 {
        self.malformed + self.no_session + self.unverified + self.expired + self.replayed + self.auth_failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters_independent() {
        let stats = FilterStats::new();
        stats.increment(Outcome::Admitted);
        stats.increment(Outcome::Replayed);
        stats.increment(Outcome::Replayed);

        assert_eq!(stats.get(Outcome::Admitted), 1);
        assert_eq!(stats.get(Outcome::Replayed), 2);
        assert_eq!(stats.get(Outcome::Malformed), 0);
        assert_eq!(stats.total(), 3);

        let snap = stats.snapshot();
        assert_eq!(snap.admitted, 1);
        assert_eq!(snap.dropped(), 2);
    }

    #[test]
    fn test_concurrent_increments_not_lost() {
        let stats = Arc::new(FilterStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        stats.increment(Outcome::AuthFailed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.get(Outcome::AuthFailed), 80_000);
    }

    #[test]
    fn test_snapshot_json_names() {
        let stats = FilterStats::new();
        stats.increment(Outcome::NoSession);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["no_session"], 1);
        assert_eq!(json["auth_failed"], 0);
        assert_eq!(Outcome::NoSession.as_str(), "no_session");
    }
}
