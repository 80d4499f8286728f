//! Message types for actor communication.
//!
//! Requests travel over `tokio::sync::mpsc`; replies come back on a
//! `tokio::sync::oneshot` carried in the request.

use crate::errors::SignalingError;
use crate::mesh::{EdgeKey, NegotiationState, OutboundSender};
use crate::protocol::{MediaState, RoomSnapshot, SignalKind};
use common::{ParticipantId, RoomId};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::oneshot;

use super::room::RoomActorHandle;

/// Messages sent to the `RoomControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Allocate a fresh room with `host_id` as its sole participant.
    CreateRoom {
        host_id: ParticipantId,
        host_display_name: Option<String>,
        title: Option<String>,
        respond_to: oneshot::Sender<Result<RoomSnapshot, SignalingError>>,
    },

    /// Look up the worker for a room.
    GetRoomHandle {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomActorHandle, SignalingError>>,
    },

    /// Current snapshot of a room.
    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomSnapshot, SignalingError>>,
    },

    /// Stop a room worker and drop it from the directory.
    RemoveRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop admitting rooms and cancel every worker.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },
}

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        participant_id: ParticipantId,
        display_name: Option<String>,
        outbound: OutboundSender,
        respond_to: oneshot::Sender<Result<JoinResult, SignalingError>>,
    },

    /// Voluntary leave. Idempotent.
    Leave {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    Signal {
        request: SignalRequest,
        respond_to: oneshot::Sender<Result<SignalOutcome, SignalingError>>,
    },

    Heartbeat {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    UpdateMedia {
        participant_id: ParticipantId,
        media_state: MediaState,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    /// Host-only.
    RemoveParticipant {
        requested_by: ParticipantId,
        target: ParticipantId,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    /// Host-only.
    CloseRoom {
        requested_by: ParticipantId,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

impl RoomMessage {
    /// Bounded label for latency metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            RoomMessage::Join { .. } => "join",
            RoomMessage::Leave { .. } => "leave",
            RoomMessage::Signal { request, .. } => request.kind.message_type().as_str(),
            RoomMessage::Heartbeat { .. } => "heartbeat",
            RoomMessage::UpdateMedia { .. } => "presence-update",
            RoomMessage::RemoveParticipant { .. } => "remove-participant",
            RoomMessage::CloseRoom { .. } => "close-room",
            RoomMessage::GetState { .. } => "get-state",
        }
    }
}

/// A signal to relay between two members.
#[derive(Debug, Clone)]
pub struct SignalRequest {
    pub from: ParticipantId,
    pub to: ParticipantId,
    pub kind: SignalKind,
    /// Client-supplied per-direction sequence.
    pub sequence: Option<u64>,
    /// Opaque SDP or candidate.
    pub payload: Value,
}

/// What happened to an accepted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Enqueued for the recipient with this delivery sequence.
    Delivered { sequence: u64 },
    /// Candidate held until the edge first becomes stable.
    Buffered,
    /// Polite offer dropped in favor of the pending impolite offer.
    IgnoredGlare,
    /// Recipient just left; dropped silently.
    Dropped,
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinResult {
    pub snapshot: RoomSnapshot,
    /// Edges created for the joiner, one per already-active member.
    pub edges: Vec<EdgeKey>,
    /// True when a timed-out participant rejoined within its grace period.
    pub reconnected: bool,
    pub display_name: String,
}

/// Status of one edge, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeStatus {
    pub key: EdgeKey,
    pub state: NegotiationState,
    pub pending_offerer: Option<ParticipantId>,
    pub buffered_candidates: usize,
}

/// Full room view returned by `GetState`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub snapshot: RoomSnapshot,
    /// Sorted by key.
    pub edges: Vec<EdgeStatus>,
    /// Participants awaiting a possible rejoin.
    pub grace_records: usize,
}

impl RoomState {
    #[must_use]
    pub fn edge(&self, a: &ParticipantId, b: &ParticipantId) -> Option<&EdgeStatus> {
        let key = EdgeKey::new(a.clone(), b.clone())?;
        self.edges.iter().find(|e| e.key == key)
    }
}

/// Directory status.
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    pub room_count: usize,
    pub participant_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
