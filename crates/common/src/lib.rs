//! Common utilities and types shared across the mesh signaling components.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

pub use types::{ParticipantId, RoomId};
