//! Scripted participant.
//!
//! A `TestPeer` owns an outbound queue, joins rooms through the worker
//! handle, and builds signals with the next per-target sequence number the
//! way a well-behaved client would.

use common::ParticipantId;
use serde_json::json;
use signaling_service::actors::{JoinResult, RoomActorHandle, SignalRequest};
use signaling_service::errors::SignalingError;
use signaling_service::mesh::{outbound_channel, OutboundReceiver};
use signaling_service::protocol::{Envelope, LeaveReason, MessageType, PresenceKind, SignalKind};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Upper bound for `recv` when work happens on another task.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// A participant driven by a test.
#[derive(Debug)]
pub struct TestPeer {
    id: ParticipantId,
    display_name: Option<String>,
    queue_capacity: usize,
    inbox: Option<OutboundReceiver>,
    last_sent: HashMap<ParticipantId, u64>,
}

impl TestPeer {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: ParticipantId::from(id),
            display_name: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            inbox: None,
            last_sent: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Outbound queue size used on the next join.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    /// Join with a fresh outbound queue. Sequence counters restart.
    pub async fn join(&mut self, room: &RoomActorHandle) -> Result<JoinResult, SignalingError> {
        let (tx, rx) = outbound_channel(self.queue_capacity);
        let result = room.join(self.id.clone(), self.display_name.clone(), tx).await?;
        self.inbox = Some(rx);
        self.last_sent.clear();
        Ok(result)
    }

    pub async fn leave(&mut self, room: &RoomActorHandle) -> Result<(), SignalingError> {
        room.leave(self.id.clone()).await
    }

    pub async fn heartbeat(&self, room: &RoomActorHandle) -> Result<(), SignalingError> {
        room.heartbeat(self.id.clone()).await
    }

    /// Drop the outbound queue, as a dead socket would.
    pub fn disconnect(&mut self) {
        self.inbox = None;
    }

    /// Forget the last sequence sent to `to`, e.g. after the server
    /// reset the edge.
    pub fn reset_sequence(&mut self, to: &ParticipantId) {
        self.last_sent.remove(to);
    }

    /// Next signal toward `to`, numbered `last + 1`.
    pub fn signal(&mut self, kind: SignalKind, to: &ParticipantId) -> SignalRequest {
        let next = self.last_sent.get(to).copied().unwrap_or(0) + 1;
        self.signal_with_sequence(kind, to, next)
    }

    /// Signal with an explicit sequence. Later calls to `signal` continue
    /// from it.
    pub fn signal_with_sequence(
        &mut self,
        kind: SignalKind,
        to: &ParticipantId,
        sequence: u64,
    ) -> SignalRequest {
        self.last_sent.insert(to.clone(), sequence);
        SignalRequest {
            from: self.id.clone(),
            to: to.clone(),
            kind,
            sequence: Some(sequence),
            payload: json!({
                "type": kind.as_str(),
                "from": self.id.as_str(),
                "sequence": sequence,
            }),
        }
    }

    pub fn offer(&mut self, to: &ParticipantId) -> SignalRequest {
        self.signal(SignalKind::Offer, to)
    }

    pub fn answer(&mut self, to: &ParticipantId) -> SignalRequest {
        self.signal(SignalKind::Answer, to)
    }

    pub fn candidate(&mut self, to: &ParticipantId) -> SignalRequest {
        self.signal(SignalKind::Candidate, to)
    }

    /// Everything queued for this peer right now.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        if let Some(inbox) = self.inbox.as_mut() {
            while let Ok(env) = inbox.try_recv() {
                out.push(env);
            }
        }
        out
    }

    /// Wait for the next envelope, for events produced outside a request
    /// round-trip such as shutdown notices.
    pub async fn recv(&mut self) -> Option<Envelope> {
        let inbox = self.inbox.as_mut()?;
        tokio::time::timeout(RECV_TIMEOUT, inbox.recv())
            .await
            .ok()
            .flatten()
    }

    /// Queued envelopes of one type; others are discarded.
    pub fn drain_kind(&mut self, kind: MessageType) -> Vec<Envelope> {
        self.drain().into_iter().filter(|e| e.kind == kind).collect()
    }

    /// Pop the next queued envelope and check its type.
    ///
    /// # Panics
    ///
    /// Panics if nothing is queued or the type differs.
    pub fn expect_next(&mut self, kind: MessageType) -> Envelope {
        let env = self
            .inbox
            .as_mut()
            .and_then(|inbox| inbox.try_recv().ok())
            .unwrap_or_else(|| panic!("{}: expected {}, queue empty", self.id, kind.as_str()));
        assert_eq!(
            env.kind,
            kind,
            "{}: expected {}, got {:?}",
            self.id,
            kind.as_str(),
            env
        );
        env
    }

    /// Pop the next envelope and check it is a presence event of `presence`.
    ///
    /// # Panics
    ///
    /// Panics on any mismatch.
    pub fn expect_presence(&mut self, presence: PresenceKind) -> Envelope {
        let env = self.expect_next(MessageType::PresenceUpdate);
        let detail = env.presence.as_ref().expect("presence detail");
        assert_eq!(detail.kind, presence, "{}: unexpected presence", self.id);
        env
    }

    /// Pop the next envelope and check it announces `who` leaving for `reason`.
    ///
    /// # Panics
    ///
    /// Panics on any mismatch.
    pub fn expect_left(&mut self, who: &ParticipantId, reason: LeaveReason) {
        let env = self.expect_presence(PresenceKind::Left);
        let detail = env.presence.as_ref().expect("presence detail");
        assert_eq!(&detail.participant_id, who);
        assert_eq!(detail.reason, Some(reason));
    }

    /// # Panics
    ///
    /// Panics if anything is queued.
    pub fn expect_silent(&mut self) {
        let pending = self.drain();
        assert!(pending.is_empty(), "{}: unexpected {:?}", self.id, pending);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_per_target() {
        let mut peer = TestPeer::new("H");
        let p = ParticipantId::from("P");
        let q = ParticipantId::from("Q");

        assert_eq!(peer.offer(&p).sequence, Some(1));
        assert_eq!(peer.candidate(&p).sequence, Some(2));
        assert_eq!(peer.offer(&q).sequence, Some(1));

        peer.reset_sequence(&p);
        assert_eq!(peer.offer(&p).sequence, Some(1));
    }

    #[test]
    fn test_explicit_sequence_continues() {
        let mut peer = TestPeer::new("H");
        let p = ParticipantId::from("P");

        let gap = peer.signal_with_sequence(SignalKind::Candidate, &p, 5);
        assert_eq!(gap.sequence, Some(5));
        assert_eq!(peer.candidate(&p).sequence, Some(6));
    }

    #[test]
    fn test_drain_before_join_is_empty() {
        let mut peer = TestPeer::new("H");
        assert!(peer.drain().is_empty());
    }
}
