//! `RoomActor` - one sequential worker per room.
//!
//! Each `RoomActor`:
//! - Owns the room's membership, edge sessions and outbound queues
//! - Processes join/leave/signal/heartbeat one at a time in arrival order
//! - Drives the heartbeat failure detector, grace records and the
//!   screen-share debounce from a single deadline timer
//! - Verifies after every step that the edge table matches membership
//!
//! Handlers are synchronous. Delivery uses `try_send`, so the worker only
//! suspends on its mailbox and its timer.
//!
//! # Exit
//!
//! The worker stops when the room empties, the host closes it, it is
//! cancelled, or the edge table disagrees with membership. In the last case
//! every member receives an error envelope and must rejoin.

use crate::config::RoomSettings;
use crate::errors::SignalingError;
use crate::mesh::{
    CandidateOutcome, Departure, EdgeKey, FailureDetector, GraceRecords, NegotiationSession,
    NegotiationState, OfferOutcome, OutboundSender, Relay, RenegotiationCoordinator,
    RenegotiationTrigger, RoomRegistry,
};
use crate::observability::metrics as prom;
use crate::protocol::{Envelope, LeaveReason, MediaState, RoomSnapshot, SignalKind};

use super::messages::{
    EdgeStatus, JoinResult, RoomMessage, RoomState, SignalOutcome, SignalRequest,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor, RoomMembership};

use common::{ParticipantId, RoomId};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// A stopped worker is reported as a missing room.
    fn gone(&self) -> SignalingError {
        SignalingError::RoomNotFound(self.room_id.to_string())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(build(tx)).await.map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    /// Admit a participant and bind its outbound queue.
    pub async fn join(
        &self,
        participant_id: ParticipantId,
        display_name: Option<String>,
        outbound: OutboundSender,
    ) -> Result<JoinResult, SignalingError> {
        self.request(|respond_to| RoomMessage::Join {
            participant_id,
            display_name,
            outbound,
            respond_to,
        })
        .await?
    }

    /// Leave voluntarily. Succeeds for non-members.
    pub async fn leave(&self, participant_id: ParticipantId) -> Result<(), SignalingError> {
        self.request(|respond_to| RoomMessage::Leave {
            participant_id,
            respond_to,
        })
        .await?
    }

    /// Relay an offer, answer or candidate.
    pub async fn signal(&self, request: SignalRequest) -> Result<SignalOutcome, SignalingError> {
        self.request(|respond_to| RoomMessage::Signal {
            request,
            respond_to,
        })
        .await?
    }

    pub async fn heartbeat(&self, participant_id: ParticipantId) -> Result<(), SignalingError> {
        self.request(|respond_to| RoomMessage::Heartbeat {
            participant_id,
            respond_to,
        })
        .await?
    }

    pub async fn update_media(
        &self,
        participant_id: ParticipantId,
        media_state: MediaState,
    ) -> Result<(), SignalingError> {
        self.request(|respond_to| RoomMessage::UpdateMedia {
            participant_id,
            media_state,
            respond_to,
        })
        .await?
    }

    pub async fn remove_participant(
        &self,
        requested_by: ParticipantId,
        target: ParticipantId,
    ) -> Result<(), SignalingError> {
        self.request(|respond_to| RoomMessage::RemoveParticipant {
            requested_by,
            target,
            respond_to,
        })
        .await?
    }

    pub async fn close(&self, requested_by: ParticipantId) -> Result<(), SignalingError> {
        self.request(|respond_to| RoomMessage::CloseRoom {
            requested_by,
            respond_to,
        })
        .await?
    }

    pub async fn get_state(&self) -> Result<RoomState, SignalingError> {
        self.request(|respond_to| RoomMessage::GetState { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// True once the worker has stopped receiving.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    settings: RoomSettings,
    registry: RoomRegistry,
    sessions: BTreeMap<EdgeKey, NegotiationSession>,
    relay: Relay,
    detector: FailureDetector,
    grace: GraceRecords,
    renegotiation: RenegotiationCoordinator,
    members: RoomMembership,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    fn new(
        room_id: RoomId,
        host_id: ParticipantId,
        host_display_name: Option<String>,
        title: Option<String>,
        settings: RoomSettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (Self, RoomActorHandle) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let registry = RoomRegistry::new(
            room_id.clone(),
            host_id.clone(),
            host_display_name,
            title,
            settings.capacity,
        );
        let mut detector = FailureDetector::new(settings.heartbeat_timeout());
        detector.track(host_id, Instant::now());
        let members = RoomMembership::new(Arc::clone(&metrics));
        members.joined();

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            settings,
            registry,
            sessions: BTreeMap::new(),
            relay: Relay::new(room_id.clone(), settings.heartbeat_timeout()),
            detector,
            grace: GraceRecords::new(settings.reconnect_grace_period),
            renegotiation: RenegotiationCoordinator::new(settings.renegotiation_debounce),
            members,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.as_str()),
        };

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        (actor, handle)
    }

    /// Spawn a worker for a freshly created room.
    ///
    /// The host is registered as the sole active participant. It binds its
    /// outbound queue later by joining.
    pub fn spawn(
        room_id: RoomId,
        host_id: ParticipantId,
        host_display_name: Option<String>,
        title: Option<String>,
        settings: RoomSettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> SpawnedRoom {
        let (actor, handle) = Self::new(
            room_id,
            host_id,
            host_display_name,
            title,
            settings,
            cancel_token,
            metrics,
        );
        let snapshot = actor.registry.snapshot();
        let members = actor.members.clone();
        let task = tokio::spawn(actor.run());
        SpawnedRoom {
            handle,
            task,
            snapshot,
            members,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "signaling.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            host_id = %self.registry.host_id(),
            "RoomActor started"
        );

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "signaling.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                () = wait_until(deadline) => {
                    self.on_timer(Instant::now());
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let label = message.label();
                            let started = Instant::now();
                            self.handle_message(message);
                            prom::record_message_latency(label, started.elapsed());
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "signaling.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }

            if let Err(violation) = self.verify_invariants() {
                self.fail(&violation);
                break;
            }

            if !self.registry.is_active() {
                info!(
                    target: "signaling.actor.room",
                    room_id = %self.room_id,
                    "Room is no longer active"
                );
                break;
            }
        }

        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            participants = self.registry.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                participant_id,
                display_name,
                outbound,
                respond_to,
            } => {
                let result = self.handle_join(participant_id, display_name, outbound);
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave {
                participant_id,
                respond_to,
            } => {
                let result = self.handle_leave(&participant_id, LeaveReason::Voluntary);
                let _ = respond_to.send(result);
            }

            RoomMessage::Signal {
                request,
                respond_to,
            } => {
                let result = self.handle_signal(request);
                let _ = respond_to.send(result);
            }

            RoomMessage::Heartbeat {
                participant_id,
                respond_to,
            } => {
                let result = self.handle_heartbeat(&participant_id);
                let _ = respond_to.send(result);
            }

            RoomMessage::UpdateMedia {
                participant_id,
                media_state,
                respond_to,
            } => {
                let result = self.handle_update_media(&participant_id, media_state);
                let _ = respond_to.send(result);
            }

            RoomMessage::RemoveParticipant {
                requested_by,
                target,
                respond_to,
            } => {
                let result = self.handle_remove_participant(&requested_by, &target);
                let _ = respond_to.send(result);
            }

            RoomMessage::CloseRoom {
                requested_by,
                respond_to,
            } => {
                let result = self.handle_close(&requested_by);
                let _ = respond_to.send(result);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    fn handle_join(
        &mut self,
        participant_id: ParticipantId,
        display_name: Option<String>,
        outbound: OutboundSender,
    ) -> Result<JoinResult, SignalingError> {
        if !self.registry.is_active() {
            return Err(SignalingError::RoomNotFound(self.room_id.to_string()));
        }
        let now = Instant::now();

        if self.registry.is_active_member(&participant_id) {
            return self.attach_existing(participant_id, outbound, now);
        }

        let remembered = self
            .grace
            .peek(&participant_id, now)
            .map(ToString::to_string);
        let reconnected = remembered.is_some();
        let edges = self
            .registry
            .join(participant_id.clone(), remembered.or(display_name))?;
        if reconnected {
            self.grace.take(&participant_id, now);
        }

        for key in &edges {
            self.sessions
                .insert(key.clone(), NegotiationSession::new(key.clone()));
        }
        self.relay.attach(participant_id.clone(), outbound);
        self.detector.track(participant_id.clone(), now);
        self.members.joined();

        let (display_name, media_state) = match self.registry.get(&participant_id) {
            Some(p) => (p.display_name.clone(), p.media_state),
            None => {
                return Err(SignalingError::Internal(
                    "participant missing after join".to_string(),
                ))
            }
        };

        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            participant_id = %participant_id,
            edges = edges.len(),
            reconnected,
            "Participant joined"
        );

        let announcement = Envelope::joined(
            self.room_id.clone(),
            participant_id.clone(),
            display_name.clone(),
            media_state,
            reconnected,
        );
        self.broadcast_except(&participant_id, &announcement);

        let snapshot = self.registry.snapshot();
        let _ = self.relay.deliver(
            &participant_id,
            Envelope::room_state(snapshot.clone(), participant_id.clone()),
        );

        Ok(JoinResult {
            snapshot,
            edges,
            reconnected,
            display_name,
        })
    }

    /// A member binding a connection: the host after creating the room, or a
    /// participant whose socket dropped before the failure detector fired.
    fn attach_existing(
        &mut self,
        participant_id: ParticipantId,
        outbound: OutboundSender,
        now: Instant,
    ) -> Result<JoinResult, SignalingError> {
        if self.relay.is_attached(&participant_id) {
            return Err(SignalingError::Conflict(
                "Participant already in room".to_string(),
            ));
        }

        self.relay.attach(participant_id.clone(), outbound);
        self.detector.heartbeat(&participant_id, now);

        // Negotiation in flight over the old connection is void.
        let stale: Vec<EdgeKey> = self
            .sessions
            .iter()
            .filter(|(key, s)| key.contains(&participant_id) && s.state() != NegotiationState::Idle)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.reset_edge(key, "reattach");
        }

        let edges: Vec<EdgeKey> = self
            .sessions
            .keys()
            .filter(|key| key.contains(&participant_id))
            .cloned()
            .collect();
        let display_name = self
            .registry
            .get(&participant_id)
            .map(|p| p.display_name.clone())
            .unwrap_or_default();

        debug!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            participant_id = %participant_id,
            reset_edges = stale.len(),
            "Connection attached to existing member"
        );

        let snapshot = self.registry.snapshot();
        let _ = self.relay.deliver(
            &participant_id,
            Envelope::room_state(snapshot.clone(), participant_id.clone()),
        );

        Ok(JoinResult {
            snapshot,
            edges,
            reconnected: false,
            display_name,
        })
    }

    fn handle_leave(
        &mut self,
        participant_id: &ParticipantId,
        reason: LeaveReason,
    ) -> Result<(), SignalingError> {
        match self.registry.leave(participant_id) {
            Some(departure) => {
                self.teardown(departure, reason);
                Ok(())
            }
            None => {
                debug!(
                    target: "signaling.actor.room",
                    room_id = %self.room_id,
                    participant_id = %participant_id,
                    "Leave for non-member ignored"
                );
                Ok(())
            }
        }
    }

    /// Close the departed participant's edges, unbind it and tell the others.
    fn teardown(&mut self, departure: Departure, reason: LeaveReason) {
        let Departure {
            participant,
            edges,
            new_host,
        } = departure;
        let participant_id = participant.id;

        for key in &edges {
            if let Some(mut session) = self.sessions.remove(key) {
                session.close();
            }
        }

        self.relay.depart(&participant_id, Instant::now());
        self.detector.forget(&participant_id);
        self.renegotiation.cancel(&participant_id);
        self.members.left();
        prom::record_participant_left(reason.as_str());

        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            participant_id = %participant_id,
            reason = reason.as_str(),
            closed_edges = edges.len(),
            remaining = self.registry.len(),
            "Participant left"
        );

        let left = Envelope::left(self.room_id.clone(), participant_id.clone(), reason);
        self.broadcast_except(&participant_id, &left);

        if let Some(new_host) = new_host {
            info!(
                target: "signaling.actor.room",
                room_id = %self.room_id,
                host_id = %new_host,
                "Host role transferred"
            );
            let announcement = Envelope::host_changed(self.room_id.clone(), new_host.clone());
            self.broadcast_except(&participant_id, &announcement);
        }
    }

    fn handle_heartbeat(&mut self, participant_id: &ParticipantId) -> Result<(), SignalingError> {
        if !self.registry.is_active_member(participant_id) {
            return Err(SignalingError::PeerNotInRoom(participant_id.to_string()));
        }
        self.detector.heartbeat(participant_id, Instant::now());
        Ok(())
    }

    fn handle_remove_participant(
        &mut self,
        requested_by: &ParticipantId,
        target: &ParticipantId,
    ) -> Result<(), SignalingError> {
        self.require_host(requested_by)?;
        if requested_by == target {
            return Err(SignalingError::Conflict(
                "Host cannot remove itself; leave instead".to_string(),
            ));
        }
        let departure = self
            .registry
            .leave(target)
            .ok_or_else(|| SignalingError::PeerNotInRoom(target.to_string()))?;

        // The removed participant hears about it before its queue is unbound.
        let _ = self.relay.deliver(
            target,
            Envelope::left(self.room_id.clone(), target.clone(), LeaveReason::Removed),
        );
        self.teardown(departure, LeaveReason::Removed);
        Ok(())
    }

    fn handle_close(&mut self, requested_by: &ParticipantId) -> Result<(), SignalingError> {
        self.require_host(requested_by)?;

        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            participants = self.registry.len(),
            "Host closed the room"
        );
        self.evict_all(|room_id, member| {
            Envelope::left(room_id, member, LeaveReason::RoomClosed)
        });
        Ok(())
    }

    fn require_host(&self, participant_id: &ParticipantId) -> Result<(), SignalingError> {
        if self.registry.host_id() != participant_id {
            return Err(SignalingError::PermissionDenied(
                "Only the host can do that".to_string(),
            ));
        }
        Ok(())
    }

    /// Remove every member, sending each one `notice`, and deactivate.
    fn evict_all(&mut self, notice: impl Fn(RoomId, ParticipantId) -> Envelope) {
        for mut session in std::mem::take(&mut self.sessions).into_values() {
            session.close();
        }
        for member in self.registry.close() {
            let _ = self
                .relay
                .deliver(&member.id, notice(self.room_id.clone(), member.id.clone()));
            self.relay.depart(&member.id, Instant::now());
            self.detector.forget(&member.id);
            self.renegotiation.cancel(&member.id);
            self.members.left();
        }
        self.relay.clear();
    }

    // ------------------------------------------------------------------
    // Signaling
    // ------------------------------------------------------------------

    fn handle_signal(&mut self, request: SignalRequest) -> Result<SignalOutcome, SignalingError> {
        let SignalRequest {
            from,
            to,
            kind,
            sequence,
            payload,
        } = request;

        if !self.registry.is_active_member(&from) {
            return Err(SignalingError::PeerNotInRoom(from.to_string()));
        }
        if !self.registry.is_active_member(&to) {
            if self.relay.recently_departed(&to, Instant::now()) {
                debug!(
                    target: "signaling.relay",
                    room_id = %self.room_id,
                    from = %from,
                    to = %to,
                    signal = kind.as_str(),
                    "Dropping signal for departed participant"
                );
                return Ok(SignalOutcome::Dropped);
            }
            return Err(SignalingError::PeerNotInRoom(to.to_string()));
        }

        let key = EdgeKey::new(from.clone(), to.clone())
            .ok_or_else(|| SignalingError::NoSuchEdge(format!("{from}|{to}")))?;
        let sequence = sequence.ok_or_else(|| {
            SignalingError::InvalidMessage("Signal messages require a sequence".to_string())
        })?;
        let session = self
            .sessions
            .get_mut(&key)
            .ok_or_else(|| SignalingError::NoSuchEdge(key.to_string()))?;

        if let Err(gap) = session.check_sequence(&from, sequence) {
            warn!(
                target: "signaling.relay",
                room_id = %self.room_id,
                edge = %key,
                from = %from,
                error = %gap,
                "Sequence anomaly, resetting edge"
            );
            self.reset_edge(&key, "sequence_gap");
            return Err(gap);
        }

        match kind {
            SignalKind::Offer => match session.apply_offer(&from, payload.clone())? {
                OfferOutcome::Relay => self.relay_signal(&key, kind, &from, &to, payload),
                OfferOutcome::RelayAfterRollback => {
                    prom::record_glare_resolution("rolled_back");
                    debug!(
                        target: "signaling.relay",
                        room_id = %self.room_id,
                        edge = %key,
                        winner = %from,
                        "Glare: polite offer rolled back"
                    );
                    self.relay_signal(&key, kind, &from, &to, payload)
                }
                OfferOutcome::IgnoredGlare => {
                    prom::record_glare_resolution("ignored");
                    debug!(
                        target: "signaling.relay",
                        room_id = %self.room_id,
                        edge = %key,
                        ignored = %from,
                        "Glare: polite offer ignored"
                    );
                    Ok(SignalOutcome::IgnoredGlare)
                }
            },
            SignalKind::Answer => {
                let flushed = session.apply_answer(&from)?;
                let outcome = self.relay_signal(&key, kind, &from, &to, payload)?;
                for candidate in flushed {
                    let Some(recipient) = key.other(&candidate.from).cloned() else {
                        continue;
                    };
                    self.relay_signal(
                        &key,
                        SignalKind::Candidate,
                        &candidate.from,
                        &recipient,
                        candidate.payload,
                    )?;
                }
                Ok(outcome)
            }
            SignalKind::Candidate => match session.apply_candidate(&from, payload.clone())? {
                CandidateOutcome::Relay => self.relay_signal(&key, kind, &from, &to, payload),
                CandidateOutcome::Buffered => Ok(SignalOutcome::Buffered),
            },
        }
    }

    /// Stamp and enqueue one signal. A rejected enqueue resets the edge.
    fn relay_signal(
        &mut self,
        key: &EdgeKey,
        kind: SignalKind,
        from: &ParticipantId,
        to: &ParticipantId,
        payload: Value,
    ) -> Result<SignalOutcome, SignalingError> {
        let sequence = self
            .sessions
            .get_mut(key)
            .ok_or_else(|| SignalingError::NoSuchEdge(key.to_string()))?
            .stamp(from)?;

        let envelope = Envelope::signal(
            kind,
            self.room_id.clone(),
            from.clone(),
            to.clone(),
            sequence,
            payload,
        );

        match self.relay.deliver(to, envelope) {
            Ok(()) => {
                prom::record_message_relayed(kind.message_type().as_str());
                Ok(SignalOutcome::Delivered { sequence })
            }
            Err(err) => {
                warn!(
                    target: "signaling.relay",
                    room_id = %self.room_id,
                    edge = %key,
                    to = %to,
                    signal = kind.as_str(),
                    "Delivery failed, resetting edge"
                );
                self.reset_edge(key, "delivery_failed");
                Err(err)
            }
        }
    }

    /// Return the edge to `Idle` and ask its impolite side for exactly one
    /// fresh offer.
    fn reset_edge(&mut self, key: &EdgeKey, reason: &'static str) {
        let Some(session) = self.sessions.get_mut(key) else {
            return;
        };
        session.reset();
        prom::record_edge_reset(reason);

        let request = Envelope::negotiation_needed(
            self.room_id.clone(),
            key.polite().clone(),
            key.impolite().clone(),
        );
        if self.relay.deliver(key.impolite(), request).is_err() {
            debug!(
                target: "signaling.relay",
                room_id = %self.room_id,
                edge = %key,
                "Could not deliver negotiation-needed after reset"
            );
        }
    }

    // ------------------------------------------------------------------
    // Media state
    // ------------------------------------------------------------------

    fn handle_update_media(
        &mut self,
        participant_id: &ParticipantId,
        requested: MediaState,
    ) -> Result<(), SignalingError> {
        if !self.registry.is_active_member(participant_id) {
            return Err(SignalingError::PeerNotInRoom(participant_id.to_string()));
        }
        let participant = self
            .registry
            .get_mut(participant_id)
            .ok_or_else(|| SignalingError::PeerNotInRoom(participant_id.to_string()))?;

        let committed_presenting = participant.media_state.is_presenting;
        let current = participant.media_state;
        let immediate_change = current.audio_enabled != requested.audio_enabled
            || current.video_enabled != requested.video_enabled
            || current.hand_raised != requested.hand_raised;

        participant.media_state.audio_enabled = requested.audio_enabled;
        participant.media_state.video_enabled = requested.video_enabled;
        participant.media_state.hand_raised = requested.hand_raised;
        let updated = participant.media_state;

        if immediate_change {
            let update =
                Envelope::media_changed(self.room_id.clone(), participant_id.clone(), updated);
            self.broadcast_except(participant_id, &update);
        }

        if let Some(trigger) = self.renegotiation.toggle(
            participant_id,
            committed_presenting,
            requested.is_presenting,
            Instant::now(),
        ) {
            self.apply_presenting(trigger);
        }
        Ok(())
    }

    /// Commit a settled presenting change and fan it out.
    fn apply_presenting(&mut self, trigger: RenegotiationTrigger) {
        let RenegotiationTrigger {
            participant_id,
            is_presenting,
        } = trigger;

        let Some(participant) = self.registry.get_mut(&participant_id) else {
            return;
        };
        participant.media_state.is_presenting = is_presenting;
        let media_state = participant.media_state;

        let edges: Vec<EdgeKey> = self
            .sessions
            .keys()
            .filter(|key| key.contains(&participant_id))
            .cloned()
            .collect();

        for key in &edges {
            if let Some(session) = self.sessions.get_mut(key) {
                session.mark_renegotiating();
            }
            let Some(peer) = key.other(&participant_id).cloned() else {
                continue;
            };
            let request =
                Envelope::negotiation_needed(self.room_id.clone(), peer, participant_id.clone());
            if self.relay.deliver(&participant_id, request).is_err() {
                self.reset_edge(key, "delivery_failed");
            }
        }
        prom::record_renegotiation_trigger(edges.len());

        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            participant_id = %participant_id,
            is_presenting,
            edges = edges.len(),
            "Presenting state committed"
        );

        let update = Envelope::media_changed(self.room_id.clone(), participant_id.clone(), media_state);
        self.broadcast_except(&participant_id, &update);
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.detector.next_deadline(),
            self.grace.next_expiry(),
            self.renegotiation.next_deadline(),
            self.relay.next_expiry(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn on_timer(&mut self, now: Instant) {
        for participant_id in self.detector.expired(now) {
            self.registry.mark_disconnected(&participant_id);
            prom::record_heartbeat_timeout();

            warn!(
                target: "signaling.actor.room",
                room_id = %self.room_id,
                participant_id = %participant_id,
                timeout_ms = self.settings.heartbeat_timeout().as_millis(),
                "Heartbeat timeout"
            );

            let display_name = self
                .registry
                .get(&participant_id)
                .map(|p| p.display_name.clone());
            match self.registry.leave(&participant_id) {
                Some(departure) => {
                    if let Some(name) = display_name {
                        self.grace.insert(participant_id.clone(), name, now);
                    }
                    self.teardown(departure, LeaveReason::Timeout);
                }
                None => self.detector.forget(&participant_id),
            }
        }

        let purged = self.grace.purge(now);
        if purged > 0 {
            debug!(
                target: "signaling.actor.room",
                room_id = %self.room_id,
                purged,
                "Reconnection grace expired"
            );
        }
        self.relay.purge(now);

        for trigger in self.renegotiation.due(now) {
            self.apply_presenting(trigger);
        }
    }

    // ------------------------------------------------------------------
    // State, invariants, shutdown
    // ------------------------------------------------------------------

    fn get_state(&self) -> RoomState {
        RoomState {
            snapshot: self.registry.snapshot(),
            edges: self
                .sessions
                .values()
                .map(|s| EdgeStatus {
                    key: s.key().clone(),
                    state: s.state(),
                    pending_offerer: s.pending_offer().map(|p| p.offerer.clone()),
                    buffered_candidates: s.buffered_len(),
                })
                .collect(),
            grace_records: self.grace.len(),
        }
    }

    /// The edge table must equal the set of pairs of active members.
    fn verify_invariants(&self) -> Result<(), SignalingError> {
        let expected = self.registry.expected_edges();
        let actual_matches = expected.len() == self.sessions.len()
            && expected.iter().all(|key| self.sessions.contains_key(key));
        if actual_matches {
            return Ok(());
        }
        Err(SignalingError::InvariantViolation(format!(
            "expected {} edges for {} active members, found {}",
            expected.len(),
            self.registry.active_members().count(),
            self.sessions.len()
        )))
    }

    /// Stop after an invariant violation. Members are told to rejoin.
    fn fail(&mut self, violation: &SignalingError) {
        error!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            error = %violation,
            "Room invariant violated, stopping room worker"
        );
        self.metrics.record_room_failure();

        let room_id = self.room_id.clone();
        let message = SignalingError::Internal(violation.to_string());
        self.evict_all(|_, member| Envelope::error(room_id.clone(), member, &message));
    }

    fn graceful_shutdown(&mut self) {
        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            participants = self.registry.len(),
            "Performing graceful shutdown"
        );
        let room_id = self.room_id.clone();
        self.evict_all(|_, member| {
            Envelope::error(room_id.clone(), member, &SignalingError::Draining)
        });
    }

    fn broadcast_except(&self, except: &ParticipantId, envelope: &Envelope) {
        let recipients: Vec<ParticipantId> = self
            .registry
            .active_members()
            .filter(|p| &p.id != except)
            .map(|p| p.id.clone())
            .collect();
        let failed = self.relay.broadcast(recipients.iter(), envelope);
        if !failed.is_empty() {
            debug!(
                target: "signaling.relay",
                room_id = %self.room_id,
                message_type = envelope.kind.as_str(),
                failed = failed.len(),
                "Broadcast not delivered to every member"
            );
        }
    }
}

/// A freshly spawned room worker.
#[derive(Debug)]
pub struct SpawnedRoom {
    pub handle: RoomActorHandle,
    pub task: JoinHandle<()>,
    /// Room as created, with the host as its only participant.
    pub snapshot: RoomSnapshot,
    /// Live member count, for settling totals if the worker dies.
    pub members: RoomMembership,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
