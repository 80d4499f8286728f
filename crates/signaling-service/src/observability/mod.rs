//! Observability for the signaling coordinator.
//!
//! # Privacy by Default
//!
//! Actor loops use `#[instrument(skip_all)]` with explicit id fields.
//! Signaling payloads are never logged or used as labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `signaling_rooms_active` | Gauge | none |
//! | `signaling_participants_active` | Gauge | none |
//! | `signaling_actor_mailbox_depth` | Gauge | `actor_type` |
//! | `signaling_messages_relayed_total` | Counter | `message_type` |
//! | `signaling_glare_resolutions_total` | Counter | `outcome` |
//! | `signaling_edge_resets_total` | Counter | `reason` |
//! | `signaling_renegotiation_triggers_total` | Counter | none |
//! | `signaling_participants_left_total` | Counter | `reason` |
//! | `signaling_heartbeat_timeouts_total` | Counter | none |
//! | `signaling_delivery_failures_total` | Counter | `reason` |
//! | `signaling_errors_total` | Counter | `operation`, `error_type`, `status_code` |
//! | `signaling_actor_panics_total` | Counter | `actor_type` |
//! | `signaling_room_failures_total` | Counter | none |
//! | `signaling_message_latency_seconds` | Histogram | `message_type` |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
