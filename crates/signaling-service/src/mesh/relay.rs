//! Per-participant outbound queues.
//!
//! Every event for a participant (relayed signals, presence, errors) goes
//! through one bounded FIFO queue, so per-edge order equals acceptance
//! order. Delivery is `try_send`: the room worker never waits on a slow
//! reader. A full or closed queue is reported as `DeliveryFailed`.
//!
//! Departed participants are remembered for a bounded window so traffic
//! already in flight to them is dropped quietly. After the window they are
//! strangers again.

use crate::errors::SignalingError;
use crate::observability::metrics;
use crate::protocol::Envelope;
use common::{ParticipantId, RoomId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Sending half of a participant's outbound queue.
pub type OutboundSender = mpsc::Sender<Envelope>;

/// Receiving half, drained by the transport into the socket.
pub type OutboundReceiver = mpsc::Receiver<Envelope>;

/// Create a bounded outbound queue.
#[must_use]
pub fn outbound_channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Delivery table for one room.
#[derive(Debug)]
pub struct Relay {
    room_id: RoomId,
    queues: HashMap<ParticipantId, OutboundSender>,
    departed: HashMap<ParticipantId, Instant>,
    departed_window: Duration,
}

impl Relay {
    /// `departed_window` is how long a departure keeps late traffic silent.
    #[must_use]
    pub fn new(room_id: RoomId, departed_window: Duration) -> Self {
        Self {
            room_id,
            queues: HashMap::new(),
            departed: HashMap::new(),
            departed_window,
        }
    }

    /// Bind `id` to its outbound queue, replacing any previous binding.
    pub fn attach(&mut self, id: ParticipantId, sender: OutboundSender) {
        self.departed.remove(&id);
        self.queues.insert(id, sender);
    }

    #[must_use]
    pub fn is_attached(&self, id: &ParticipantId) -> bool {
        self.queues.get(id).is_some_and(|tx| !tx.is_closed())
    }

    /// Unbind `id` and remember when it left, so late traffic for it can be
    /// dropped silently.
    pub fn depart(&mut self, id: &ParticipantId, now: Instant) -> Option<OutboundSender> {
        if !self.departed_window.is_zero() {
            self.departed.insert(id.clone(), now);
        }
        self.queues.remove(id)
    }

    /// True while `id` is within the departed window.
    #[must_use]
    pub fn recently_departed(&self, id: &ParticipantId, now: Instant) -> bool {
        self.departed
            .get(id)
            .is_some_and(|left_at| now.saturating_duration_since(*left_at) < self.departed_window)
    }

    /// Forget departures older than the window. Returns how many were dropped.
    pub fn purge(&mut self, now: Instant) -> usize {
        let before = self.departed.len();
        let window = self.departed_window;
        self.departed
            .retain(|_, left_at| now.saturating_duration_since(*left_at) < window);
        before - self.departed.len()
    }

    /// When the oldest departure record lapses.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.departed
            .values()
            .min()
            .and_then(|left_at| left_at.checked_add(self.departed_window))
    }

    /// Enqueue `envelope` for `to` without waiting.
    pub fn deliver(&self, to: &ParticipantId, envelope: Envelope) -> Result<(), SignalingError> {
        let kind = envelope.kind;
        let Some(sender) = self.queues.get(to) else {
            metrics::record_delivery_failure("detached");
            return Err(SignalingError::DeliveryFailed(format!(
                "{to} has no outbound queue"
            )));
        };

        match sender.try_send(envelope) {
            Ok(()) => {
                debug!(
                    target: "signaling.relay",
                    room_id = %self.room_id,
                    to = %to,
                    message_type = kind.as_str(),
                    "Enqueued"
                );
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "signaling.relay",
                    room_id = %self.room_id,
                    to = %to,
                    message_type = kind.as_str(),
                    "Outbound queue full"
                );
                metrics::record_delivery_failure("full");
                Err(SignalingError::DeliveryFailed(format!("{to} queue full")))
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    target: "signaling.relay",
                    room_id = %self.room_id,
                    to = %to,
                    message_type = kind.as_str(),
                    "Outbound queue closed"
                );
                metrics::record_delivery_failure("closed");
                Err(SignalingError::DeliveryFailed(format!("{to} queue closed")))
            }
        }
    }

    /// Deliver a copy of `envelope` to each of `recipients`. Returns the
    /// recipients whose queue rejected it.
    pub fn broadcast<'a, I>(&self, recipients: I, envelope: &Envelope) -> Vec<ParticipantId>
    where
        I: IntoIterator<Item = &'a ParticipantId>,
    {
        recipients
            .into_iter()
            .filter(|id| self.deliver(id, envelope.clone()).is_err())
            .cloned()
            .collect()
    }

    /// Drop every binding and departure record. Used when the room shuts down.
    pub fn clear(&mut self) {
        self.queues.clear();
        self.departed.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::{LeaveReason, MessageType};

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    const WINDOW: Duration = Duration::from_secs(15);

    fn relay() -> Relay {
        Relay::new(RoomId::from("R1"), WINDOW)
    }

    fn env(n: u64) -> Envelope {
        Envelope::signal(
            crate::protocol::SignalKind::Candidate,
            RoomId::from("R1"),
            pid("H"),
            pid("P"),
            n,
            serde_json::json!({"n": n}),
        )
    }

    #[tokio::test]
    async fn test_deliver_preserves_fifo_order() {
        let mut relay = relay();
        let (tx, mut rx) = outbound_channel(8);
        relay.attach(pid("P"), tx);

        for n in 1..=3 {
            relay.deliver(&pid("P"), env(n)).unwrap();
        }
        for n in 1..=3 {
            assert_eq!(rx.recv().await.unwrap().sequence, Some(n));
        }
    }

    #[tokio::test]
    async fn test_full_queue_fails_without_blocking() {
        let mut relay = relay();
        let (tx, _rx) = outbound_channel(1);
        relay.attach(pid("P"), tx);

        relay.deliver(&pid("P"), env(1)).unwrap();
        let err = relay.deliver(&pid("P"), env(2)).unwrap_err();
        assert!(matches!(err, SignalingError::DeliveryFailed(_)));
    }

    #[tokio::test]
    async fn test_closed_queue_fails() {
        let mut relay = relay();
        let (tx, rx) = outbound_channel(4);
        relay.attach(pid("P"), tx);
        drop(rx);

        assert!(!relay.is_attached(&pid("P")));
        assert!(matches!(
            relay.deliver(&pid("P"), env(1)),
            Err(SignalingError::DeliveryFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_depart_tracks_recent_departures() {
        let now = Instant::now();
        let mut relay = relay();
        let (tx, _rx) = outbound_channel(4);
        relay.attach(pid("P"), tx);

        assert!(relay.depart(&pid("P"), now).is_some());
        assert!(relay.recently_departed(&pid("P"), now));
        assert!(!relay.recently_departed(&pid("Q"), now));

        let (tx, _rx2) = outbound_channel(4);
        relay.attach(pid("P"), tx);
        assert!(!relay.recently_departed(&pid("P"), now));
    }

    #[tokio::test]
    async fn test_departure_records_expire_after_window() {
        let start = Instant::now();
        let mut relay = relay();
        let (tx, _rx) = outbound_channel(4);
        relay.attach(pid("P"), tx);
        relay.depart(&pid("P"), start);
        relay.depart(&pid("Q"), start + Duration::from_secs(5));

        assert_eq!(relay.next_expiry(), Some(start + WINDOW));
        assert!(relay.recently_departed(&pid("P"), start + WINDOW - Duration::from_millis(1)));
        assert!(!relay.recently_departed(&pid("P"), start + WINDOW));

        assert_eq!(relay.purge(start + WINDOW), 1);
        assert_eq!(
            relay.next_expiry(),
            Some(start + Duration::from_secs(5) + WINDOW)
        );
        assert_eq!(relay.purge(start + Duration::from_secs(5) + WINDOW), 1);
        assert!(relay.next_expiry().is_none());
    }

    #[tokio::test]
    async fn test_zero_window_keeps_no_departures() {
        let mut relay = Relay::new(RoomId::from("R1"), Duration::ZERO);
        relay.depart(&pid("P"), Instant::now());
        assert!(!relay.recently_departed(&pid("P"), Instant::now()));
        assert!(relay.next_expiry().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reports_failures() {
        let mut relay = relay();
        let (tx_a, mut rx_a) = outbound_channel(4);
        let (tx_b, rx_b) = outbound_channel(4);
        relay.attach(pid("A"), tx_a);
        relay.attach(pid("B"), tx_b);
        drop(rx_b);

        let left = Envelope::left(RoomId::from("R1"), pid("C"), LeaveReason::Voluntary);
        let failed = relay.broadcast([pid("A"), pid("B")].iter(), &left);

        assert_eq!(failed, vec![pid("B")]);
        assert_eq!(rx_a.recv().await.unwrap().kind, MessageType::PresenceUpdate);
    }
}
