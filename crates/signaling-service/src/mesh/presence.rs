//! Liveness tracking and reconnection grace records.
//!
//! Uses `tokio::time::Instant` so paused-clock tests drive expiry.

use common::ParticipantId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Heartbeat-based failure detector for one room.
#[derive(Debug)]
pub struct FailureDetector {
    timeout: Duration,
    last_seen: HashMap<ParticipantId, Instant>,
}

impl FailureDetector {
    /// `timeout` is heartbeat interval times the miss multiplier.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: HashMap::new(),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start watching `id` as of `now`.
    pub fn track(&mut self, id: ParticipantId, now: Instant) {
        self.last_seen.insert(id, now);
    }

    /// Record a heartbeat. Returns false for an untracked participant.
    pub fn heartbeat(&mut self, id: &ParticipantId, now: Instant) -> bool {
        match self.last_seen.get_mut(id) {
            Some(seen) => {
                *seen = now;
                true
            }
            None => false,
        }
    }

    pub fn forget(&mut self, id: &ParticipantId) {
        self.last_seen.remove(id);
    }

    /// Participants silent for at least the timeout, sorted by id.
    #[must_use]
    pub fn expired(&self, now: Instant) -> Vec<ParticipantId> {
        let mut expired: Vec<ParticipantId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) >= self.timeout)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();
        expired
    }

    /// Earliest instant at which someone could expire. `None` when nobody is
    /// tracked or the deadline lies beyond the clock's range.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.last_seen
            .values()
            .min()
            .and_then(|seen| seen.checked_add(self.timeout))
    }
}

#[derive(Debug, Clone)]
struct GraceRecord {
    display_name: String,
    /// `None` when the period runs past the clock's range.
    expires_at: Option<Instant>,
}

impl GraceRecord {
    fn is_live(&self, now: Instant) -> bool {
        !matches!(self.expires_at, Some(at) if now >= at)
    }
}

/// Identities of timed-out participants that may still rejoin.
#[derive(Debug)]
pub struct GraceRecords {
    period: Duration,
    records: HashMap<ParticipantId, GraceRecord>,
}

impl GraceRecords {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            records: HashMap::new(),
        }
    }

    /// Remember `id` after a timeout. A zero period disables reconnection.
    pub fn insert(&mut self, id: ParticipantId, display_name: String, now: Instant) {
        if self.period.is_zero() {
            return;
        }
        self.records.insert(
            id,
            GraceRecord {
                display_name,
                expires_at: now.checked_add(self.period),
            },
        );
    }

    /// Display name remembered for `id`, if still within its grace period.
    #[must_use]
    pub fn peek(&self, id: &ParticipantId, now: Instant) -> Option<&str> {
        self.records
            .get(id)
            .filter(|r| r.is_live(now))
            .map(|r| r.display_name.as_str())
    }

    /// Consume the record for `id` if it is still within its grace period.
    pub fn take(&mut self, id: &ParticipantId, now: Instant) -> Option<String> {
        let record = self.records.remove(id)?;
        record.is_live(now).then_some(record.display_name)
    }

    /// Drop expired records. Returns how many were dropped.
    pub fn purge(&mut self, now: Instant) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.is_live(now));
        before - self.records.len()
    }

    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.records.values().filter_map(|r| r.expires_at).min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
