//! Mesh signaling coordinator library.
//!
//! Coordinates connection establishment among participants of small
//! full-mesh rooms:
//!
//! - Room membership with capacity limits and a host role
//! - One negotiation edge per pair of active participants, with
//!   deterministic polite/impolite roles for glare resolution
//! - Ordered, sequenced relay of offers, answers and candidates
//! - Heartbeat failure detection with a reconnection grace period
//! - Debounced renegotiation when a participant starts or stops presenting
//!
//! Media never passes through this service.
//!
//! # Architecture
//!
//! ```text
//! RoomControllerActor (singleton per instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── RoomRegistry           membership, host role
//!         ├── NegotiationSession     one per edge
//!         ├── Relay                  bounded outbound queue per participant
//!         ├── FailureDetector        heartbeats
//!         ├── GraceRecords           timed-out identities awaiting rejoin
//!         └── RenegotiationCoordinator  screen-share debounce
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Room directory and per-room workers
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types and wire error codes
//! - [`identity`] - Token verification ahead of `join`
//! - [`mesh`] - Synchronous in-room state machines
//! - [`observability`] - Metrics and health endpoints
//! - [`protocol`] - Wire envelope
//! - [`transport`] - WebSocket and REST surface

pub mod actors;
pub mod config;
pub mod errors;
pub mod identity;
pub mod mesh;
pub mod observability;
pub mod protocol;
pub mod transport;
