//! WebSocket connection handling.
//!
//! One socket per authenticated participant. Inbound text frames are parsed
//! as envelopes and dispatched to the participant's room worker. A writer
//! task drains the participant's outbound queue into the socket.
//!
//! Closing the socket without `leave` does not remove the participant; the
//! room's failure detector does that once heartbeats stop.

use crate::actors::{RoomActorHandle, RoomControllerActorHandle, SignalOutcome, SignalRequest};
use crate::errors::SignalingError;
use crate::mesh::{outbound_channel, OutboundSender};
use crate::observability::metrics as prom;
use crate::protocol::{Envelope, MessageType};

use super::{error_response, AppState};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{ParticipantId, RoomId};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// `GET /ws?token=...`
///
/// The identity check runs before the upgrade; a rejected token never
/// reaches a room worker.
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let participant_id = match state.authenticate(params.token.as_deref()) {
        Ok(id) => id,
        Err(err) => return error_response(&err),
    };
    let Some(ws) = ws else {
        return (StatusCode::BAD_REQUEST, "WebSocket upgrade required").into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, participant_id, state))
}

async fn handle_socket(socket: WebSocket, participant_id: ParticipantId, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = outbound_channel(state.outbound_queue_capacity);

    let writer_id = participant_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let text = match envelope.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        target: "signaling.transport",
                        participant_id = %writer_id,
                        error = %e,
                        "Failed to encode envelope"
                    );
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    info!(
        target: "signaling.transport",
        participant_id = %participant_id,
        "WebSocket connected"
    );

    let mut connection = Connection::new(participant_id.clone(), state.controller.clone(), outbound);

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => connection.handle_text(&text).await,
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => connection.handle_text(text).await,
                Err(_) => connection.report(
                    RoomId::from(""),
                    "decode",
                    &SignalingError::InvalidMessage("Binary frames must be UTF-8 JSON".to_string()),
                ),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(
                    target: "signaling.transport",
                    participant_id = %participant_id,
                    error = %e,
                    "WebSocket read error"
                );
                break;
            }
        }
    }

    // Dropping the receiver marks the queue closed for the room's relay.
    writer.abort();

    info!(
        target: "signaling.transport",
        participant_id = %participant_id,
        room_id = connection.current_room().map(RoomId::as_str),
        "WebSocket disconnected"
    );
}

/// Per-socket dispatcher. Holds the authenticated identity, the outbound
/// queue and the room currently joined.
#[derive(Debug)]
pub struct Connection {
    participant_id: ParticipantId,
    controller: RoomControllerActorHandle,
    outbound: OutboundSender,
    room: Option<RoomActorHandle>,
}

impl Connection {
    #[must_use]
    pub fn new(
        participant_id: ParticipantId,
        controller: RoomControllerActorHandle,
        outbound: OutboundSender,
    ) -> Self {
        Self {
            participant_id,
            controller,
            outbound,
            room: None,
        }
    }

    #[must_use]
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    #[must_use]
    pub fn current_room(&self) -> Option<&RoomId> {
        self.room.as_ref().map(RoomActorHandle::room_id)
    }

    /// Parse and dispatch one frame. Failures go back to this participant
    /// as an `error` envelope.
    pub async fn handle_text(&mut self, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                let room_id = self.current_room().cloned().unwrap_or_else(|| RoomId::from(""));
                self.report(room_id, "decode", &err);
                return;
            }
        };

        let room_id = envelope.room_id.clone();
        let operation = envelope.kind.as_str();
        if let Err(err) = self.dispatch(envelope).await {
            if matches!(err, SignalingError::RoomNotFound(_))
                && self.current_room() == Some(&room_id)
            {
                self.room = None;
            }
            self.report(room_id, operation, &err);
        }
    }

    /// Route one envelope to the room worker.
    pub async fn dispatch(&mut self, envelope: Envelope) -> Result<(), SignalingError> {
        if envelope.from_id != self.participant_id {
            return Err(SignalingError::Unauthorized(
                "fromId does not match the authenticated identity".to_string(),
            ));
        }

        match envelope.kind {
            MessageType::Join => self.join(envelope).await,
            MessageType::NegotiationNeeded | MessageType::Error => {
                Err(SignalingError::InvalidMessage(format!(
                    "{} is server-originated",
                    envelope.kind.as_str()
                )))
            }
            MessageType::Leave => {
                let room = self.room_for(&envelope.room_id)?;
                room.leave(self.participant_id.clone()).await?;
                self.room = None;
                Ok(())
            }
            MessageType::Heartbeat => {
                let room = self.room_for(&envelope.room_id)?;
                room.heartbeat(self.participant_id.clone()).await
            }
            MessageType::SignalOffer | MessageType::SignalAnswer | MessageType::SignalCandidate => {
                self.signal(envelope).await
            }
            MessageType::PresenceUpdate => {
                let room = self.room_for(&envelope.room_id)?;
                let media_state = envelope.media_state.ok_or_else(|| {
                    SignalingError::InvalidMessage("presence-update requires mediaState".to_string())
                })?;
                room.update_media(self.participant_id.clone(), media_state)
                    .await
            }
            MessageType::RemoveParticipant => {
                let room = self.room_for(&envelope.room_id)?;
                let target = envelope.to_id.ok_or_else(|| {
                    SignalingError::InvalidMessage("remove-participant requires toId".to_string())
                })?;
                room.remove_participant(self.participant_id.clone(), target)
                    .await
            }
            MessageType::CloseRoom => {
                let room = self.room_for(&envelope.room_id)?;
                room.close(self.participant_id.clone()).await?;
                self.room = None;
                Ok(())
            }
        }
    }

    async fn join(&mut self, envelope: Envelope) -> Result<(), SignalingError> {
        if let Some(previous) = self.room.take() {
            if previous.room_id() != &envelope.room_id {
                let _ = previous.leave(self.participant_id.clone()).await;
            } else {
                self.room = Some(previous);
            }
        }

        let display_name = envelope
            .payload
            .as_ref()
            .and_then(|p| p.get("displayName"))
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let room = self.controller.get_room_handle(envelope.room_id).await?;
        let result = room
            .join(self.participant_id.clone(), display_name, self.outbound.clone())
            .await?;

        debug!(
            target: "signaling.transport",
            participant_id = %self.participant_id,
            room_id = %room.room_id(),
            edges = result.edges.len(),
            reconnected = result.reconnected,
            "Joined room"
        );
        self.room = Some(room);
        Ok(())
    }

    async fn signal(&mut self, envelope: Envelope) -> Result<(), SignalingError> {
        let room = self.room_for(&envelope.room_id)?;
        let Some(kind) = envelope.kind.signal_kind() else {
            return Err(SignalingError::InvalidMessage("not a signal".to_string()));
        };
        let to = envelope.to_id.ok_or_else(|| {
            SignalingError::InvalidMessage("Signal messages require toId".to_string())
        })?;
        let payload_len = envelope.payload.as_ref().map_or(0, |p| p.to_string().len());

        let outcome = room
            .signal(SignalRequest {
                from: self.participant_id.clone(),
                to,
                kind,
                sequence: envelope.sequence,
                payload: envelope.payload.unwrap_or(Value::Null),
            })
            .await?;

        match outcome {
            SignalOutcome::Delivered { .. } => {}
            SignalOutcome::Buffered | SignalOutcome::IgnoredGlare | SignalOutcome::Dropped => {
                debug!(
                    target: "signaling.transport",
                    participant_id = %self.participant_id,
                    signal = kind.as_str(),
                    payload_len,
                    outcome = ?outcome,
                    "Signal not forwarded immediately"
                );
            }
        }
        Ok(())
    }

    fn room_for(&self, room_id: &RoomId) -> Result<RoomActorHandle, SignalingError> {
        match &self.room {
            Some(room) if room.room_id() == room_id => Ok(room.clone()),
            _ => Err(SignalingError::PeerNotInRoom(self.participant_id.to_string())),
        }
    }

    /// Send an `error` envelope to this participant and count it.
    pub fn report(&self, room_id: RoomId, operation: &'static str, err: &SignalingError) {
        let code = err.error_code();
        prom::record_error(operation, code.as_str(), code.as_u16());
        debug!(
            target: "signaling.transport",
            participant_id = %self.participant_id,
            operation,
            error = %err,
            "Request rejected"
        );
        let envelope = Envelope::error(room_id, self.participant_id.clone(), err);
        if self.outbound.try_send(envelope).is_err() {
            debug!(
                target: "signaling.transport",
                participant_id = %self.participant_id,
                "Could not enqueue error envelope"
            );
        }
    }
}
