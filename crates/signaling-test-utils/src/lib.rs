//! # Signaling Test Utilities
//!
//! Shared fixtures for exercising the signaling coordinator without a
//! network: rooms spawned under a real room directory, and peers that own
//! an outbound queue the way a WebSocket connection would.
//!
//! ## Modules
//!
//! - `fixtures` - Room builder and identity token helpers
//! - `peer` - `TestPeer`, a scripted participant with per-target sequences
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signaling_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let room = TestRoom::new("H").start().await;
//!     let mut host = TestPeer::new("H");
//!     let mut guest = TestPeer::new("P");
//!     host.join(&room.room).await.unwrap();
//!     guest.join(&room.room).await.unwrap();
//!
//!     let offer = host.offer(guest.id());
//!     room.room.signal(offer).await.unwrap();
//!     guest.expect_next(MessageType::SignalOffer);
//! }
//! ```

pub mod fixtures;
pub mod peer;

pub use fixtures::*;
pub use peer::*;
