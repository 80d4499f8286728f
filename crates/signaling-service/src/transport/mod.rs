//! Client-facing HTTP surface.
//!
//! - `GET /ws?token=...` - signaling WebSocket ([`websocket`])
//! - `POST /rooms` - create a room; the caller becomes host
//! - `GET /rooms/:room_id` - room snapshot
//!
//! REST calls carry the identity token as `Authorization: Bearer <token>`.

pub mod websocket;

use crate::actors::RoomControllerActorHandle;
use crate::errors::SignalingError;
use crate::identity::IdentityVerifier;
use crate::observability::metrics as prom;
use crate::protocol::{ErrorBody, RoomSnapshot};

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{ParticipantId, RoomId};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use websocket::{websocket_handler, Connection};

/// Shared state for the transport routes.
#[derive(Clone)]
pub struct AppState {
    pub controller: RoomControllerActorHandle,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub outbound_queue_capacity: usize,
}

impl AppState {
    /// Resolve a token to a participant id.
    pub fn authenticate(&self, token: Option<&str>) -> Result<ParticipantId, SignalingError> {
        let result = match token {
            Some(token) => self.verifier.verify(token),
            None => Err(SignalingError::Unauthorized("missing token".to_string())),
        };
        if let Err(err) = &result {
            let code = err.error_code();
            prom::record_error("authenticate", code.as_str(), code.as_u16());
        }
        result
    }

    fn authenticate_bearer(&self, headers: &HeaderMap) -> Result<ParticipantId, SignalingError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        self.authenticate(token)
    }
}

/// Build the client-facing router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/rooms", post(create_room))
        .route("/rooms/:room_id", get(get_room))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateRoomRequest {
    pub title: Option<String>,
    pub display_name: Option<String>,
}

async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomSnapshot>), Response> {
    let host_id = state
        .authenticate_bearer(&headers)
        .map_err(|err| error_response(&err))?;

    let snapshot = state
        .controller
        .create_room(host_id, request.display_name, request.title)
        .await
        .map_err(|err| error_response(&err))?;

    info!(
        target: "signaling.transport",
        room_id = %snapshot.room_id,
        host_id = %snapshot.host_id,
        "Room created over REST"
    );
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn get_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSnapshot>, Response> {
    state
        .authenticate_bearer(&headers)
        .map_err(|err| error_response(&err))?;

    state
        .controller
        .get_room(RoomId::from(room_id))
        .await
        .map(Json)
        .map_err(|err| error_response(&err))
}

fn status_for(err: &SignalingError) -> StatusCode {
    match err {
        SignalingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        SignalingError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        SignalingError::RoomNotFound(_) | SignalingError::PeerNotInRoom(_) => StatusCode::NOT_FOUND,
        SignalingError::Conflict(_) | SignalingError::RoomFull { .. } => StatusCode::CONFLICT,
        SignalingError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
        SignalingError::TooManyRooms | SignalingError::Draining => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// JSON error response with a client-safe message.
pub fn error_response(err: &SignalingError) -> Response {
    let body = ErrorBody {
        code: err.error_code(),
        message: err.client_message(),
    };
    (status_for(err), Json(body)).into_response()
}
