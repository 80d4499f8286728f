//! `RoomControllerActor` - singleton directory of room workers.
//!
//! The controller:
//!
//! - Allocates room ids and spawns one `RoomActor` per room
//! - Hands out `RoomActorHandle`s to connections
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Reaps room workers that stopped (empty, closed, failed or panicked)
//!
//! # Graceful Shutdown
//!
//! On shutdown the controller stops admitting rooms and cancels the root
//! token. Every room worker tells its members the service is draining and
//! exits.

use crate::config::RoomSettings;
use crate::errors::SignalingError;
use crate::protocol::RoomSnapshot;

use super::messages::{ControllerMessage, ControllerStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor, RoomMembership};
use super::room::{RoomActor, RoomActorHandle, SpawnedRoom};

use common::{ParticipantId, RoomId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// How often stopped room workers are reaped when the mailbox is quiet.
const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// How long to wait for room workers during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the `RoomControllerActor`.
#[derive(Debug, Clone)]
pub struct RoomControllerActorHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
}

impl RoomControllerActorHandle {
    /// Spawn the controller and return a handle to it.
    #[must_use]
    pub fn new(
        instance_id: String,
        max_rooms: usize,
        settings: RoomSettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomControllerActor::new(
            instance_id,
            max_rooms,
            settings,
            receiver,
            cancel_token.clone(),
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControllerMessage,
    ) -> Result<T, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Allocate a room with `host_id` as its host and only participant.
    pub async fn create_room(
        &self,
        host_id: ParticipantId,
        host_display_name: Option<String>,
        title: Option<String>,
    ) -> Result<RoomSnapshot, SignalingError> {
        self.request(|respond_to| ControllerMessage::CreateRoom {
            host_id,
            host_display_name,
            title,
            respond_to,
        })
        .await?
    }

    pub async fn get_room_handle(&self, room_id: RoomId) -> Result<RoomActorHandle, SignalingError> {
        self.request(|respond_to| ControllerMessage::GetRoomHandle {
            room_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_room(&self, room_id: RoomId) -> Result<RoomSnapshot, SignalingError> {
        self.request(|respond_to| ControllerMessage::GetRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    pub async fn remove_room(&self, room_id: RoomId) -> Result<(), SignalingError> {
        self.request(|respond_to| ControllerMessage::RemoveRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_status(&self) -> Result<ControllerStatus, SignalingError> {
        self.request(|respond_to| ControllerMessage::GetStatus { respond_to })
            .await
    }

    /// Stop admitting rooms and cancel every room worker.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), SignalingError> {
        self.request(|respond_to| ControllerMessage::Shutdown {
            deadline,
            respond_to,
        })
        .await?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    members: RoomMembership,
}

/// The `RoomControllerActor` implementation.
pub struct RoomControllerActor {
    instance_id: String,
    max_rooms: usize,
    settings: RoomSettings,
    receiver: mpsc::Receiver<ControllerMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, ManagedRoom>,
    accepting_new: bool,
    /// How long each room worker gets to drain once cancelled.
    shutdown_deadline: Duration,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomControllerActor {
    fn new(
        instance_id: String,
        max_rooms: usize,
        settings: RoomSettings,
        receiver: mpsc::Receiver<ControllerMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Controller, &instance_id);

        Self {
            instance_id,
            max_rooms,
            settings,
            receiver,
            cancel_token,
            rooms: HashMap::new(),
            accepting_new: true,
            shutdown_deadline: SHUTDOWN_TIMEOUT,
            metrics,
            mailbox,
        }
    }

    #[instrument(skip_all, name = "signaling.actor.controller", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "signaling.actor.controller",
            instance_id = %self.instance_id,
            max_rooms = self.max_rooms,
            "RoomControllerActor started"
        );

        let mut reap = tokio::time::interval(REAP_INTERVAL);
        reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "signaling.actor.controller",
                        instance_id = %self.instance_id,
                        "RoomControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                _ = reap.tick() => {}

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "signaling.actor.controller",
                                instance_id = %self.instance_id,
                                "RoomControllerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "signaling.actor.controller",
            instance_id = %self.instance_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::CreateRoom {
                host_id,
                host_display_name,
                title,
                respond_to,
            } => {
                let result = self.create_room(host_id, host_display_name, title);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetRoomHandle {
                room_id,
                respond_to,
            } => {
                let result = self.get_room_handle(&room_id);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_room(&room_id).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::RemoveRoom {
                room_id,
                respond_to,
            } => {
                let result = self.remove_room(&room_id);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline);
                let _ = respond_to.send(result);
            }
        }
    }

    fn create_room(
        &mut self,
        host_id: ParticipantId,
        host_display_name: Option<String>,
        title: Option<String>,
    ) -> Result<RoomSnapshot, SignalingError> {
        if !self.accepting_new {
            return Err(SignalingError::Draining);
        }
        if self.rooms.len() >= self.max_rooms {
            warn!(
                target: "signaling.actor.controller",
                instance_id = %self.instance_id,
                max_rooms = self.max_rooms,
                "Room limit reached"
            );
            return Err(SignalingError::TooManyRooms);
        }

        let mut room_id = RoomId::generate();
        while self.rooms.contains_key(&room_id) {
            room_id = RoomId::generate();
        }

        let SpawnedRoom {
            handle,
            task,
            snapshot,
            members,
        } = RoomActor::spawn(
            room_id.clone(),
            host_id,
            host_display_name,
            title,
            self.settings,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle,
                task_handle: task,
                members,
            },
        );
        self.metrics.room_created();

        info!(
            target: "signaling.actor.controller",
            instance_id = %self.instance_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(snapshot)
    }

    fn get_room_handle(&mut self, room_id: &RoomId) -> Result<RoomActorHandle, SignalingError> {
        match self.rooms.get(room_id) {
            Some(managed) if !managed.handle.is_closed() => Ok(managed.handle.clone()),
            Some(_) => {
                self.reap(room_id);
                Err(SignalingError::RoomNotFound(room_id.to_string()))
            }
            None => Err(SignalingError::RoomNotFound(room_id.to_string())),
        }
    }

    async fn get_room(&mut self, room_id: &RoomId) -> Result<RoomSnapshot, SignalingError> {
        let handle = self
            .rooms
            .get(room_id)
            .map(|managed| managed.handle.clone())
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()))?;

        match handle.get_state().await {
            Ok(state) => Ok(state.snapshot),
            Err(err) => {
                debug!(
                    target: "signaling.actor.controller",
                    instance_id = %self.instance_id,
                    room_id = %room_id,
                    "Room worker no longer answering"
                );
                self.reap(room_id);
                Err(err)
            }
        }
    }

    /// Cancel a room worker without waiting for it.
    fn remove_room(&mut self, room_id: &RoomId) -> Result<(), SignalingError> {
        let managed = self
            .rooms
            .remove(room_id)
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()))?;

        managed.handle.cancel();

        let room = room_id.clone();
        let instance_id = self.instance_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "signaling.actor.controller",
                        instance_id = %instance_id,
                        room_id = %room,
                        "Room worker completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    let released = managed.members.release();
                    warn!(
                        target: "signaling.actor.controller",
                        instance_id = %instance_id,
                        room_id = %room,
                        error = ?e,
                        released,
                        "Room worker panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "signaling.actor.controller",
                        instance_id = %instance_id,
                        room_id = %room,
                        "Room worker cleanup timed out"
                    );
                }
            }
        });

        self.metrics.room_removed();

        info!(
            target: "signaling.actor.controller",
            instance_id = %self.instance_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room removed"
        );

        Ok(())
    }

    /// Forget a room whose worker has stopped.
    fn reap(&mut self, room_id: &RoomId) {
        if self.rooms.remove(room_id).is_some() {
            self.metrics.room_removed();
        }
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            room_count: self.rooms.len(),
            participant_count: self.metrics.participant_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self, deadline: Duration) -> Result<(), SignalingError> {
        info!(
            target: "signaling.actor.controller",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            deadline_secs = deadline.as_secs(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.shutdown_deadline = deadline;
        self.cancel_token.cancel();
        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "signaling.actor.controller",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(self.shutdown_deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "signaling.actor.controller",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        "Room worker completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    let released = managed.members.release();
                    warn!(
                        target: "signaling.actor.controller",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        error = ?e,
                        released,
                        "Room worker panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "signaling.actor.controller",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        "Room worker shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(
            target: "signaling.actor.controller",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop rooms whose worker has finished, noting panics.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };
            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "signaling.actor.controller",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        "Room worker exited"
                    );
                }
                Err(join_error) => {
                    let released = managed.members.release();
                    if join_error.is_panic() {
                        error!(
                            target: "signaling.actor.controller",
                            instance_id = %self.instance_id,
                            room_id = %room_id,
                            error = ?join_error,
                            released,
                            "Room worker panicked"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }
            self.metrics.room_removed();
        }
    }
}
