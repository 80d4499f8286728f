//! Wire envelope exchanged with clients over the WebSocket transport.
//!
//! One JSON object per event. Field names are camelCase and the `type`
//! discriminator is kebab-case. Signaling payloads (SDP, ICE candidates) are
//! carried as opaque JSON and never inspected.

use crate::errors::{ErrorCode, SignalingError};
use common::{ParticipantId, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Join,
    Leave,
    Heartbeat,
    SignalOffer,
    SignalAnswer,
    SignalCandidate,
    PresenceUpdate,
    NegotiationNeeded,
    Error,
    /// Host-only: remove `toId` from the room.
    RemoveParticipant,
    /// Host-only: end the room for everyone.
    CloseRoom,
}

impl MessageType {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageType::Join => "join",
            MessageType::Leave => "leave",
            MessageType::Heartbeat => "heartbeat",
            MessageType::SignalOffer => "signal-offer",
            MessageType::SignalAnswer => "signal-answer",
            MessageType::SignalCandidate => "signal-candidate",
            MessageType::PresenceUpdate => "presence-update",
            MessageType::NegotiationNeeded => "negotiation-needed",
            MessageType::Error => "error",
            MessageType::RemoveParticipant => "remove-participant",
            MessageType::CloseRoom => "close-room",
        }
    }

    /// Returns the signal kind for `signal-*` types.
    #[must_use]
    pub const fn signal_kind(self) -> Option<SignalKind> {
        match self {
            MessageType::SignalOffer => Some(SignalKind::Offer),
            MessageType::SignalAnswer => Some(SignalKind::Answer),
            MessageType::SignalCandidate => Some(SignalKind::Candidate),
            _ => None,
        }
    }
}

/// The three relayed signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    #[must_use]
    pub const fn message_type(self) -> MessageType {
        match self {
            SignalKind::Offer => MessageType::SignalOffer,
            SignalKind::Answer => MessageType::SignalAnswer,
            SignalKind::Candidate => MessageType::SignalCandidate,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        }
    }
}

/// Abstract media flags. The coordinator never touches media bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaState {
    #[serde(default)]
    pub audio_enabled: bool,
    #[serde(default)]
    pub video_enabled: bool,
    #[serde(default)]
    pub is_presenting: bool,
    #[serde(default)]
    pub hand_raised: bool,
}

/// Why a participant left the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaveReason {
    Voluntary,
    Timeout,
    Removed,
    RoomClosed,
}

impl LeaveReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LeaveReason::Voluntary => "voluntary",
            LeaveReason::Timeout => "timeout",
            LeaveReason::Removed => "removed",
            LeaveReason::RoomClosed => "room-closed",
        }
    }
}

/// Kind of server-originated presence event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceKind {
    /// A new participant is now active.
    Joined,
    /// A participant who timed out came back within the grace period.
    Reconnected,
    /// A participant left (see `reason`).
    Left,
    /// A participant's media flags changed.
    MediaChanged,
    /// The host role moved to another participant.
    HostChanged,
    /// Full room snapshot, sent to a participant right after it joins.
    RoomState,
}

/// Participant as presented to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub id: ParticipantId,
    pub display_name: String,
    pub media_state: MediaState,
}

/// Point-in-time view of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub host_id: ParticipantId,
    /// In join order.
    pub participants: Vec<ParticipantSummary>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    pub is_active: bool,
}

/// Presence detail attached to `presence-update` envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceDetail {
    pub kind: PresenceKind,
    pub participant_id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<LeaveReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomSnapshot>,
}

impl PresenceDetail {
    fn new(kind: PresenceKind, participant_id: ParticipantId) -> Self {
        Self {
            kind,
            participant_id,
            display_name: None,
            reason: None,
            host_id: None,
            room: None,
        }
    }
}

/// Error detail attached to `error` envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// One signaling event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub room_id: RoomId,
    pub from_id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_state: Option<MediaState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    fn bare(kind: MessageType, room_id: RoomId, from_id: ParticipantId) -> Self {
        Self {
            kind,
            room_id,
            from_id,
            to_id: None,
            sequence: None,
            payload: None,
            media_state: None,
            presence: None,
            error: None,
        }
    }

    /// Parse a client frame.
    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|e| SignalingError::InvalidMessage(e.to_string()))
    }

    /// Serialize for the socket.
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::Internal(e.to_string()))
    }

    /// A relayed signal, stamped with the per-direction delivery sequence.
    #[must_use]
    pub fn signal(
        kind: SignalKind,
        room_id: RoomId,
        from_id: ParticipantId,
        to_id: ParticipantId,
        sequence: u64,
        payload: Value,
    ) -> Self {
        Self {
            to_id: Some(to_id),
            sequence: Some(sequence),
            payload: Some(payload),
            ..Self::bare(kind.message_type(), room_id, from_id)
        }
    }

    /// Tells `to_id` to create a fresh offer toward `peer_id`.
    #[must_use]
    pub fn negotiation_needed(room_id: RoomId, peer_id: ParticipantId, to_id: ParticipantId) -> Self {
        Self {
            to_id: Some(to_id),
            ..Self::bare(MessageType::NegotiationNeeded, room_id, peer_id)
        }
    }

    #[must_use]
    pub fn joined(
        room_id: RoomId,
        participant_id: ParticipantId,
        display_name: String,
        media_state: MediaState,
        reconnected: bool,
    ) -> Self {
        let kind = if reconnected {
            PresenceKind::Reconnected
        } else {
            PresenceKind::Joined
        };
        let mut presence = PresenceDetail::new(kind, participant_id.clone());
        presence.display_name = Some(display_name);
        Self {
            media_state: Some(media_state),
            presence: Some(presence),
            ..Self::bare(MessageType::PresenceUpdate, room_id, participant_id)
        }
    }

    #[must_use]
    pub fn left(room_id: RoomId, participant_id: ParticipantId, reason: LeaveReason) -> Self {
        let mut presence = PresenceDetail::new(PresenceKind::Left, participant_id.clone());
        presence.reason = Some(reason);
        Self {
            presence: Some(presence),
            ..Self::bare(MessageType::PresenceUpdate, room_id, participant_id)
        }
    }

    #[must_use]
    pub fn media_changed(
        room_id: RoomId,
        participant_id: ParticipantId,
        media_state: MediaState,
    ) -> Self {
        Self {
            media_state: Some(media_state),
            presence: Some(PresenceDetail::new(
                PresenceKind::MediaChanged,
                participant_id.clone(),
            )),
            ..Self::bare(MessageType::PresenceUpdate, room_id, participant_id)
        }
    }

    #[must_use]
    pub fn host_changed(room_id: RoomId, host_id: ParticipantId) -> Self {
        let mut presence = PresenceDetail::new(PresenceKind::HostChanged, host_id.clone());
        presence.host_id = Some(host_id.clone());
        Self {
            presence: Some(presence),
            ..Self::bare(MessageType::PresenceUpdate, room_id, host_id)
        }
    }

    #[must_use]
    pub fn room_state(snapshot: RoomSnapshot, to_id: ParticipantId) -> Self {
        let mut presence = PresenceDetail::new(PresenceKind::RoomState, to_id.clone());
        presence.host_id = Some(snapshot.host_id.clone());
        let room_id = snapshot.room_id.clone();
        let host_id = snapshot.host_id.clone();
        presence.room = Some(snapshot);
        Self {
            to_id: Some(to_id),
            presence: Some(presence),
            ..Self::bare(MessageType::PresenceUpdate, room_id, host_id)
        }
    }

    /// Structured error for the originating client.
    #[must_use]
    pub fn error(room_id: RoomId, to_id: ParticipantId, err: &SignalingError) -> Self {
        Self {
            to_id: Some(to_id.clone()),
            error: Some(ErrorBody {
                code: err.error_code(),
                message: err.client_message(),
            }),
            ..Self::bare(MessageType::Error, room_id, to_id)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_client_offer() {
        let text = r#"{
            "type": "signal-offer",
            "roomId": "R1",
            "fromId": "H",
            "toId": "P",
            "sequence": 1,
            "payload": {"sdp": "v=0", "type": "offer"}
        }"#;

        let env = Envelope::from_json(text).unwrap();
        assert_eq!(env.kind, MessageType::SignalOffer);
        assert_eq!(env.kind.signal_kind(), Some(SignalKind::Offer));
        assert_eq!(env.room_id, RoomId::from("R1"));
        assert_eq!(env.to_id, Some(ParticipantId::from("P")));
        assert_eq!(env.sequence, Some(1));
        assert_eq!(env.payload, Some(json!({"sdp": "v=0", "type": "offer"})));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let text = r#"{"type": "teleport", "roomId": "R1", "fromId": "H"}"#;
        let err = Envelope::from_json(text).unwrap_err();
        assert!(matches!(err, SignalingError::InvalidMessage(_)));
    }

    #[test]
    fn test_parse_media_state_defaults_missing_flags() {
        let text = r#"{
            "type": "presence-update",
            "roomId": "R1",
            "fromId": "P",
            "mediaState": {"isPresenting": true}
        }"#;
        let env = Envelope::from_json(text).unwrap();
        let media = env.media_state.unwrap();
        assert!(media.is_presenting);
        assert!(!media.audio_enabled);
        assert!(!media.hand_raised);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let env = Envelope::negotiation_needed(
            RoomId::from("R1"),
            ParticipantId::from("H"),
            ParticipantId::from("P"),
        );
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "negotiation-needed");
        assert_eq!(value["fromId"], "H");
        assert_eq!(value["toId"], "P");
        assert!(value.get("sequence").is_none());
        assert!(value.get("payload").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_left_carries_reason() {
        let env = Envelope::left(
            RoomId::from("R1"),
            ParticipantId::from("P"),
            LeaveReason::Timeout,
        );
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "presence-update");
        assert_eq!(value["presence"]["kind"], "left");
        assert_eq!(value["presence"]["reason"], "timeout");
        assert_eq!(value["presence"]["participantId"], "P");
    }

    #[test]
    fn test_error_envelope_uses_client_message() {
        let err = SignalingError::PeerNotInRoom("Q".to_string());
        let env = Envelope::error(RoomId::from("R1"), ParticipantId::from("P"), &err);
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "error");
        assert_eq!(value["error"]["code"], "PEER_NOT_IN_ROOM");
        assert_eq!(value["error"]["message"], "Peer is not in the room");
    }

    #[test]
    fn test_joined_vs_reconnected_kind() {
        let joined = Envelope::joined(
            RoomId::from("R1"),
            ParticipantId::from("P"),
            "Participant 2".to_string(),
            MediaState::default(),
            false,
        );
        let rejoined = Envelope::joined(
            RoomId::from("R1"),
            ParticipantId::from("P"),
            "Participant 2".to_string(),
            MediaState::default(),
            true,
        );

        assert_eq!(joined.presence.unwrap().kind, PresenceKind::Joined);
        assert_eq!(rejoined.presence.unwrap().kind, PresenceKind::Reconnected);
    }

    #[test]
    fn test_leave_reason_labels() {
        assert_eq!(LeaveReason::RoomClosed.as_str(), "room-closed");
        assert_eq!(
            serde_json::to_string(&LeaveReason::RoomClosed).unwrap(),
            "\"room-closed\""
        );
        assert_eq!(MessageType::SignalCandidate.as_str(), "signal-candidate");
    }
}
