//! In-process counters for the room directory and its workers.
//!
//! [`MailboxMonitor`] tracks how many requests an actor is holding and
//! mirrors the depth to `signaling_actor_mailbox_depth`. Depth is logged once
//! when it crosses the elevated mark and on every request past the critical
//! mark:
//!
//! | Actor      | Elevated | Critical |
//! |------------|----------|----------|
//! | Controller | 200      | 800      |
//! | Room       | 100      | 400      |

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Depth marks for one kind of actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxThresholds {
    pub elevated: usize,
    pub critical: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// The room directory.
    Controller,
    /// A per-room worker.
    Room,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Controller => "controller",
            ActorType::Room => "room",
        }
    }

    #[must_use]
    pub const fn thresholds(&self) -> MailboxThresholds {
        match self {
            ActorType::Controller => MailboxThresholds {
                elevated: 200,
                critical: 800,
            },
            ActorType::Room => MailboxThresholds {
                elevated: 100,
                critical: 400,
            },
        }
    }
}

/// Request depth for one actor.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Room id, or the instance id for the controller.
    actor_id: String,
    depth: AtomicUsize,
    processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
        }
    }

    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), depth);

        let marks = self.actor_type.thresholds();
        if depth > marks.critical {
            warn!(
                target: "signaling.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                "Mailbox depth critical"
            );
        } else if depth == marks.elevated + 1 {
            debug!(
                target: "signaling.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Saturates at zero.
    pub fn record_dequeue(&self) {
        let before = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or(0);
        self.processed.fetch_add(1, Ordering::Relaxed);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), before.saturating_sub(1));
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

fn decrement(counter: &AtomicUsize) -> usize {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            Some(n.saturating_sub(1))
        })
        .unwrap_or(0)
        .saturating_sub(1)
}

/// Counters shared by the directory, every room worker and the readiness
/// probe.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    rooms: AtomicUsize,
    participants: AtomicUsize,
    panics: AtomicU64,
    room_failures: AtomicU64,
    messages: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        let rooms = self.rooms.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_rooms_active(rooms as u64);
    }

    pub fn room_removed(&self) {
        prom::set_rooms_active(decrement(&self.rooms) as u64);
    }

    pub fn participant_joined(&self) {
        self.participants.fetch_add(1, Ordering::Relaxed);
        prom::participant_joined();
    }

    pub fn participant_left(&self) {
        decrement(&self.participants);
        prom::participant_left();
    }

    /// Drop `count` participants whose room stopped without removing them.
    pub fn participants_lost(&self, count: usize) {
        if count == 0 {
            return;
        }
        let _ = self
            .participants
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(count))
            });
        prom::participants_lost(count);
    }

    /// A room worker task panicked.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.panics.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_actor_panic(actor_type.as_str());
        error!(
            target: "signaling.actor.panic",
            actor_type = actor_type.as_str(),
            total,
            "Actor panic detected"
        );
    }

    /// A room worker stopped on an invariant violation.
    pub fn record_room_failure(&self) {
        self.room_failures.fetch_add(1, Ordering::Relaxed);
        prom::record_room_failure();
    }

    pub fn record_message_processed(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn room_failure_count(&self) -> u64 {
        self.room_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }
}

/// Participants one room has counted into [`ActorMetrics`].
///
/// The directory keeps a clone so it can settle the totals when the room
/// worker dies with members still inside.
#[derive(Debug, Clone)]
pub struct RoomMembership {
    count: Arc<AtomicUsize>,
    metrics: Arc<ActorMetrics>,
}

impl RoomMembership {
    #[must_use]
    pub fn new(metrics: Arc<ActorMetrics>) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            metrics,
        }
    }

    pub fn joined(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.metrics.participant_joined();
    }

    pub fn left(&self) {
        decrement(&self.count);
        self.metrics.participant_left();
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Remove whatever the room still holds from the shared totals.
    /// Returns how many participants were released.
    pub fn release(&self) -> usize {
        let remaining = self.count.swap(0, Ordering::Relaxed);
        self.metrics.participants_lost(remaining);
        remaining
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_ordered() {
        for actor in [ActorType::Controller, ActorType::Room] {
            let marks = actor.thresholds();
            assert!(marks.elevated < marks.critical, "{}", actor.as_str());
        }
    }

    #[test]
    fn test_mailbox_depth_tracks_requests() {
        let monitor = MailboxMonitor::new(ActorType::Room, "R1");

        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 2);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 1);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_mailbox_depth_past_critical_keeps_counting() {
        let monitor = MailboxMonitor::new(ActorType::Room, "R-busy");
        let critical = ActorType::Room.thresholds().critical;
        for _ in 0..=critical {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_depth(), critical + 1);
    }

    #[test]
    fn test_dequeue_saturates() {
        let monitor = MailboxMonitor::new(ActorType::Controller, "sig-test");
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_room_and_participant_counts() {
        let metrics = ActorMetrics::new();

        metrics.room_created();
        metrics.room_created();
        metrics.room_removed();
        assert_eq!(metrics.room_count(), 1);

        metrics.participant_joined();
        metrics.participant_joined();
        metrics.participant_left();
        assert_eq!(metrics.participant_count(), 1);

        metrics.room_removed();
        metrics.room_removed();
        assert_eq!(metrics.room_count(), 0);
    }

    #[test]
    fn test_room_membership_release_settles_totals() {
        let metrics = ActorMetrics::new();
        let first = RoomMembership::new(Arc::clone(&metrics));
        let second = RoomMembership::new(Arc::clone(&metrics));

        first.joined();
        first.joined();
        first.joined();
        first.left();
        second.joined();
        assert_eq!(first.count(), 2);
        assert_eq!(metrics.participant_count(), 3);

        assert_eq!(first.release(), 2);
        assert_eq!(first.count(), 0);
        assert_eq!(metrics.participant_count(), 1);

        // Releasing twice does not undercount the other room.
        assert_eq!(first.release(), 0);
        assert_eq!(metrics.participant_count(), 1);
    }

    #[test]
    fn test_failure_counters() {
        let metrics = ActorMetrics::new();
        metrics.record_panic(ActorType::Room);
        metrics.record_room_failure();
        metrics.record_message_processed();

        assert_eq!(metrics.panic_count(), 1);
        assert_eq!(metrics.room_failure_count(), 1);
        assert_eq!(metrics.messages_processed(), 1);
    }
}
