//! Signaling coordinator error types.
//!
//! Every error maps to a wire `ErrorCode` carried in an `error` envelope.
//! Internal details are logged server-side but not exposed to clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code carried in the `error` envelope sent back to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    RoomNotFound,
    RoomFull,
    PeerNotInRoom,
    NoSuchEdge,
    SequenceGap,
    Conflict,
    InvalidMessage,
    DeliveryFailed,
    CapacityExceeded,
    InternalError,
}

impl ErrorCode {
    /// Numeric form used as the `status_code` metric label.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            ErrorCode::Unauthorized => 2,
            ErrorCode::Forbidden => 3,
            ErrorCode::RoomNotFound => 4,
            ErrorCode::Conflict => 5,
            ErrorCode::InternalError => 6,
            ErrorCode::CapacityExceeded => 7,
            ErrorCode::RoomFull => 8,
            ErrorCode::PeerNotInRoom => 9,
            ErrorCode::NoSuchEdge => 10,
            ErrorCode::SequenceGap => 11,
            ErrorCode::InvalidMessage => 12,
            ErrorCode::DeliveryFailed => 13,
        }
    }

    /// Wire name, also used as the `error_type` metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::RoomNotFound => "ROOM_NOT_FOUND",
            ErrorCode::RoomFull => "ROOM_FULL",
            ErrorCode::PeerNotInRoom => "PEER_NOT_IN_ROOM",
            ErrorCode::NoSuchEdge => "NO_SUCH_EDGE",
            ErrorCode::SequenceGap => "SEQUENCE_GAP",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::DeliveryFailed => "DELIVERY_FAILED",
            ErrorCode::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Signaling coordinator error type.
///
/// Only `InvariantViolation` is fatal, and only to the room worker that
/// detected it. Everything else is reported to the originating client.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Room does not exist (or has already been destroyed).
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room is at its configured participant capacity.
    #[error("Room at capacity ({capacity} participants)")]
    RoomFull { capacity: usize },

    /// Sender or recipient is not an active member of the room.
    #[error("Peer not in room: {0}")]
    PeerNotInRoom(String),

    /// The two participants share no edge.
    #[error("No such edge: {0}")]
    NoSuchEdge(String),

    /// Out-of-order sequence on an edge. Recoverable: the edge is reset.
    #[error("Sequence gap: expected {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },

    /// Identity check rejected the caller before any room was contacted.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Conflict (e.g., participant already in the room).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Host-only operation attempted by a non-host.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Recipient queue rejected the message. The edge is reset.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// Message is valid on the wire but not in the current negotiation state.
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Envelope could not be parsed or lacks a required field.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The directory has reached its room limit.
    #[error("Room limit reached")]
    TooManyRooms,

    /// The service is shutting down.
    #[error("Service is draining")]
    Draining,

    /// Edge table and membership disagree. Fatal to the room worker.
    #[error("Room invariant violated: {0}")]
    InvariantViolation(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    /// Returns the wire `ErrorCode` for this error.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            SignalingError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            SignalingError::RoomFull { .. } => ErrorCode::RoomFull,
            SignalingError::PeerNotInRoom(_) => ErrorCode::PeerNotInRoom,
            SignalingError::NoSuchEdge(_) => ErrorCode::NoSuchEdge,
            SignalingError::SequenceGap { .. } => ErrorCode::SequenceGap,
            SignalingError::Unauthorized(_) => ErrorCode::Unauthorized,
            SignalingError::Conflict(_) | SignalingError::UnexpectedMessage(_) => {
                ErrorCode::Conflict
            }
            SignalingError::PermissionDenied(_) => ErrorCode::Forbidden,
            SignalingError::DeliveryFailed(_) => ErrorCode::DeliveryFailed,
            SignalingError::InvalidMessage(_) => ErrorCode::InvalidMessage,
            SignalingError::TooManyRooms | SignalingError::Draining => {
                ErrorCode::CapacityExceeded
            }
            SignalingError::InvariantViolation(_) | SignalingError::Internal(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SignalingError::RoomNotFound(_) => "Room not found".to_string(),
            SignalingError::RoomFull { capacity } => {
                format!("Room is full ({capacity} participants)")
            }
            SignalingError::PeerNotInRoom(_) => "Peer is not in the room".to_string(),
            SignalingError::NoSuchEdge(_) => "No connection exists between these peers".to_string(),
            SignalingError::SequenceGap { expected, received } => {
                format!("Sequence gap (expected {expected}, received {received}); renegotiate")
            }
            SignalingError::Unauthorized(_) => "Invalid or missing identity token".to_string(),
            SignalingError::DeliveryFailed(_) => {
                "Message could not be delivered; renegotiate".to_string()
            }
            SignalingError::TooManyRooms => "Server is at capacity, please try again".to_string(),
            SignalingError::Draining => "Server is shutting down, please reconnect".to_string(),
            SignalingError::InvariantViolation(_) | SignalingError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            SignalingError::Conflict(msg)
            | SignalingError::PermissionDenied(msg)
            | SignalingError::UnexpectedMessage(msg)
            | SignalingError::InvalidMessage(msg) => msg.clone(),
        }
    }

    /// Whether the error triggers an edge reset instead of a plain rejection.
    #[must_use]
    pub fn resets_edge(&self) -> bool {
        matches!(
            self,
            SignalingError::SequenceGap { .. } | SignalingError::DeliveryFailed(_)
        )
    }

    /// Whether the error must stop the room worker.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SignalingError::InvariantViolation(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            SignalingError::RoomNotFound("R1".to_string()).error_code(),
            ErrorCode::RoomNotFound
        );
        assert_eq!(
            SignalingError::RoomFull { capacity: 25 }.error_code(),
            ErrorCode::RoomFull
        );
        assert_eq!(
            SignalingError::PeerNotInRoom("p".to_string()).error_code(),
            ErrorCode::PeerNotInRoom
        );
        assert_eq!(
            SignalingError::NoSuchEdge("a|b".to_string()).error_code(),
            ErrorCode::NoSuchEdge
        );
        assert_eq!(
            SignalingError::SequenceGap {
                expected: 2,
                received: 4
            }
            .error_code(),
            ErrorCode::SequenceGap
        );
        assert_eq!(
            SignalingError::Unauthorized("bad mac".to_string()).error_code(),
            ErrorCode::Unauthorized
        );
        assert_eq!(
            SignalingError::PermissionDenied("not host".to_string()).error_code(),
            ErrorCode::Forbidden
        );
        assert_eq!(SignalingError::Draining.error_code(), ErrorCode::CapacityExceeded);
        assert_eq!(
            SignalingError::InvariantViolation("edge mismatch".to_string()).error_code(),
            ErrorCode::InternalError
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = SignalingError::Internal("mailbox closed for room 9f2c".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = SignalingError::RoomNotFound("secret-room-id".to_string());
        assert!(!err.client_message().contains("secret-room-id"));

        let err = SignalingError::Unauthorized("hmac mismatch for alice".to_string());
        assert!(!err.client_message().contains("alice"));
    }

    #[test]
    fn test_recoverable_and_fatal_classification() {
        assert!(SignalingError::SequenceGap {
            expected: 1,
            received: 3
        }
        .resets_edge());
        assert!(SignalingError::DeliveryFailed("queue full".to_string()).resets_edge());
        assert!(!SignalingError::NoSuchEdge("x".to_string()).resets_edge());

        assert!(SignalingError::InvariantViolation("x".to_string()).is_fatal());
        assert!(!SignalingError::SequenceGap {
            expected: 1,
            received: 3
        }
        .is_fatal());
    }

    #[test]
    fn test_error_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::PeerNotInRoom).unwrap();
        assert_eq!(json, "\"PEER_NOT_IN_ROOM\"");
        assert_eq!(ErrorCode::InternalError.as_u16(), 6);
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                SignalingError::SequenceGap {
                    expected: 3,
                    received: 5
                }
            ),
            "Sequence gap: expected 3, received 5"
        );
        assert_eq!(
            format!("{}", SignalingError::RoomFull { capacity: 2 }),
            "Room at capacity (2 participants)"
        );
    }
}
