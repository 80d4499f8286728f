//! Actor model for the signaling coordinator.
//!
//! ```text
//! RoomControllerActor (singleton per instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── owns membership, edges and outbound queues
//!         └── drives heartbeats, grace records and renegotiation debounce
//! ```
//!
//! # Key Design Decisions
//!
//! - **One worker per room**: everything for a room happens in arrival order
//!   on one task, so no room state is shared between tasks
//! - **CancellationToken propagation**: room workers hold child tokens of
//!   the controller's root token
//! - **Non-blocking delivery**: outbound queues are bounded and written with
//!   `try_send`; a full queue is a delivery failure, never a stall
//!
//! # Modules
//!
//! - [`controller`] - `RoomControllerActor`, the room directory
//! - [`room`] - `RoomActor`, one per active room
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod controller;
pub mod messages;
pub mod metrics;
pub mod room;

pub use controller::{RoomControllerActor, RoomControllerActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor, RoomMembership};
pub use room::{RoomActor, RoomActorHandle, SpawnedRoom};
