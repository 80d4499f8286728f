//! In-room state machines.
//!
//! Everything here is synchronous and owned by a single room actor:
//!
//! - [`edge`] - canonical peer pairs and politeness
//! - [`negotiation`] - per-edge perfect-negotiation session
//! - [`registry`] - membership, capacity, host role
//! - [`relay`] - bounded per-participant outbound queues
//! - [`renegotiation`] - screen-share toggle debounce
//! - [`presence`] - heartbeat failure detector and grace records

pub mod edge;
pub mod negotiation;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod renegotiation;

pub use edge::{politeness, Direction, EdgeKey, Role};
pub use negotiation::{
    BufferedCandidate, CandidateOutcome, NegotiationSession, NegotiationState, OfferOutcome,
    PendingOffer,
};
pub use presence::{FailureDetector, GraceRecords};
pub use registry::{ConnectionState, Departure, Participant, RoomRegistry};
pub use relay::{outbound_channel, OutboundReceiver, OutboundSender, Relay};
pub use renegotiation::{RenegotiationCoordinator, RenegotiationTrigger};
