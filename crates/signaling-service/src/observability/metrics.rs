//! Metrics definitions for the signaling coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `signaling_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 2 values (controller, room)
//! - `message_type`: bounded by envelope types (~11 values)
//! - `outcome`: glare outcomes (rolled_back, ignored)
//! - `reason`: bounded reset / delivery / leave reasons
//!
//! Room and participant ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("signaling_message".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `signaling_rooms_active`
pub fn set_rooms_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("signaling_rooms_active").set(count as f64);
}

/// Metric: `signaling_participants_active`
///
/// Adjusted by each room worker on join and leave.
pub fn participant_joined() {
    gauge!("signaling_participants_active").increment(1.0);
}

pub fn participant_left() {
    gauge!("signaling_participants_active").decrement(1.0);
}

pub fn participants_lost(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("signaling_participants_active").decrement(count as f64);
}

/// Metric: `signaling_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("signaling_actor_mailbox_depth", "actor_type" => actor_type.to_string())
        .set(depth as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Metric: `signaling_messages_relayed_total`
/// Labels: `message_type`
pub fn record_message_relayed(message_type: &str) {
    counter!("signaling_messages_relayed_total", "message_type" => message_type.to_string())
        .increment(1);
}

/// Metric: `signaling_glare_resolutions_total`
/// Labels: `outcome` (rolled_back, ignored)
pub fn record_glare_resolution(outcome: &str) {
    counter!("signaling_glare_resolutions_total", "outcome" => outcome.to_string()).increment(1);
}

/// Metric: `signaling_edge_resets_total`
/// Labels: `reason` (sequence_gap, delivery_failed)
pub fn record_edge_reset(reason: &str) {
    counter!("signaling_edge_resets_total", "reason" => reason.to_string()).increment(1);
}

/// Metric: `signaling_renegotiation_triggers_total`
pub fn record_renegotiation_trigger(edges: usize) {
    counter!("signaling_renegotiation_triggers_total").increment(edges as u64);
}

/// Metric: `signaling_participants_left_total`
/// Labels: `reason` (voluntary, timeout, removed, room-closed)
pub fn record_participant_left(reason: &str) {
    counter!("signaling_participants_left_total", "reason" => reason.to_string()).increment(1);
}

/// Metric: `signaling_heartbeat_timeouts_total`
pub fn record_heartbeat_timeout() {
    counter!("signaling_heartbeat_timeouts_total").increment(1);
}

/// Metric: `signaling_delivery_failures_total`
/// Labels: `reason` (full, closed, detached)
pub fn record_delivery_failure(reason: &str) {
    counter!("signaling_delivery_failures_total", "reason" => reason.to_string()).increment(1);
}

/// Metric: `signaling_errors_total`
/// Labels: `operation`, `error_type`, `status_code`
pub fn record_error(operation: &str, error_type: &str, status_code: u16) {
    counter!(
        "signaling_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Metric: `signaling_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("signaling_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// Metric: `signaling_room_failures_total`
///
/// Room workers stopped by an invariant violation.
pub fn record_room_failure() {
    counter!("signaling_room_failures_total").increment(1);
}

// ============================================================================
// Histograms
// ============================================================================

/// Metric: `signaling_message_latency_seconds`
/// Labels: `message_type`
///
/// Time from mailbox receipt to handler completion inside a room worker.
pub fn record_message_latency(message_type: &str, duration: Duration) {
    histogram!("signaling_message_latency_seconds", "message_type" => message_type.to_string())
        .record(duration.as_secs_f64());
}
