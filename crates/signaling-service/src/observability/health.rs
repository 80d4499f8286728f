//! Probe and scrape endpoints, served on the health listener.
//!
//! - `GET /health` - liveness, always 200 while the process runs
//! - `GET /ready` - 200 while rooms are admitted, 503 once draining; the body
//!   carries current room and participant counts
//! - `GET /metrics` - Prometheus text format

use crate::actors::ActorMetrics;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Admission flag plus the counters the readiness probe reports.
#[derive(Debug)]
pub struct HealthState {
    admitting: AtomicBool,
    actors: Arc<ActorMetrics>,
}

impl HealthState {
    /// Starts out not admitting; call `set_ready` once the listeners are up.
    #[must_use]
    pub fn new(actors: Arc<ActorMetrics>) -> Self {
        Self {
            admitting: AtomicBool::new(false),
            actors,
        }
    }

    pub fn set_ready(&self) {
        self.admitting.store(true, Ordering::SeqCst);
    }

    /// Stop advertising readiness, e.g. when draining starts.
    pub fn set_not_ready(&self) {
        self.admitting.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.admitting.load(Ordering::SeqCst)
    }

    fn report(&self) -> Readiness {
        Readiness {
            status: if self.is_ready() { "ready" } else { "draining" },
            rooms: self.actors.room_count(),
            participants: self.actors.participant_count(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Readiness {
    status: &'static str,
    rooms: usize,
    participants: usize,
}

/// Build the health router. `/metrics` is mounted only with a handle.
pub fn health_router(state: Arc<HealthState>, metrics_handle: Option<PrometheusHandle>) -> Router {
    let probes = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness))
        .with_state(state);

    let Some(handle) = metrics_handle else {
        return probes;
    };
    probes.merge(
        Router::new()
            .route("/metrics", get(scrape))
            .with_state(handle),
    )
}

async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let status = if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(state.report()))
}

#[tracing::instrument(skip_all, name = "signaling.metrics.scrape")]
async fn scrape(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::util::ServiceExt;

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_liveness_always_ok() {
        let state = Arc::new(HealthState::new(ActorMetrics::new()));
        let response = health_router(state, None)
            .oneshot(get_req("/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_reports_counts_and_drain() {
        let actors = ActorMetrics::new();
        actors.room_created();
        actors.participant_joined();
        actors.participant_joined();
        let state = Arc::new(HealthState::new(Arc::clone(&actors)));

        let response = health_router(Arc::clone(&state), None)
            .oneshot(get_req("/ready"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready();
        let response = health_router(Arc::clone(&state), None)
            .oneshot(get_req("/ready"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ready");
        assert_eq!(body["rooms"], 1);
        assert_eq!(body["participants"], 2);

        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_metrics_mounted_only_with_handle() {
        let state = Arc::new(HealthState::new(ActorMetrics::new()));

        let response = health_router(Arc::clone(&state), None)
            .oneshot(get_req("/metrics"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let handle = PrometheusBuilder::new().build_recorder().handle();
        let response = health_router(state, Some(handle))
            .oneshot(get_req("/metrics"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
