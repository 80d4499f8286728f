//! Room membership: join order, capacity, connection state and host role.
//!
//! The registry is owned by the room actor and mutated only from its
//! message loop. It knows nothing about negotiation; it reports which edges
//! appear or disappear and the actor keeps the session table in step.

use super::edge::EdgeKey;
use crate::errors::SignalingError;
use crate::protocol::{MediaState, ParticipantSummary, RoomSnapshot};
use chrono::{DateTime, Utc};
use common::{ParticipantId, RoomId};
use std::collections::BTreeSet;

/// Participant lifecycle inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Joining,
    Active,
    Disconnected,
}

/// A room member.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub media_state: MediaState,
    pub connection_state: ConnectionState,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    #[must_use]
    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            media_state: self.media_state,
        }
    }
}

/// Result of removing a participant.
#[derive(Debug)]
pub struct Departure {
    pub participant: Participant,
    /// Edges that existed between the departed participant and others.
    pub edges: Vec<EdgeKey>,
    /// Set when the host left and the role moved.
    pub new_host: Option<ParticipantId>,
}

/// Membership table for one room.
#[derive(Debug)]
pub struct RoomRegistry {
    room_id: RoomId,
    title: Option<String>,
    host_id: ParticipantId,
    /// Join order.
    participants: Vec<Participant>,
    created_at: DateTime<Utc>,
    is_active: bool,
    capacity: usize,
    /// Source of default display names.
    admitted: u64,
}

impl RoomRegistry {
    /// Register a new room with `host_id` as its sole, active participant.
    #[must_use]
    pub fn new(
        room_id: RoomId,
        host_id: ParticipantId,
        host_display_name: Option<String>,
        title: Option<String>,
        capacity: usize,
    ) -> Self {
        let mut registry = Self {
            room_id,
            title,
            host_id: host_id.clone(),
            participants: Vec::new(),
            created_at: Utc::now(),
            is_active: true,
            capacity,
            admitted: 0,
        };
        let display_name = registry.display_name_for(host_display_name);
        registry.participants.push(Participant {
            id: host_id,
            display_name,
            media_state: MediaState::default(),
            connection_state: ConnectionState::Active,
            joined_at: registry.created_at,
        });
        registry
    }

    fn display_name_for(&mut self, requested: Option<String>) -> String {
        self.admitted = self.admitted.saturating_add(1);
        match requested {
            Some(name) if !name.trim().is_empty() => name,
            _ => format!("Participant {}", self.admitted),
        }
    }

    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    #[must_use]
    pub fn host_id(&self) -> &ParticipantId {
        &self.host_id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.iter().any(|p| &p.id == id)
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    pub fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| &p.id == id)
    }

    #[must_use]
    pub fn is_active_member(&self, id: &ParticipantId) -> bool {
        self.get(id)
            .is_some_and(|p| p.connection_state == ConnectionState::Active)
    }

    /// Active members in join order.
    pub fn active_members(&self) -> impl Iterator<Item = &Participant> {
        self.participants
            .iter()
            .filter(|p| p.connection_state == ConnectionState::Active)
    }

    /// Admit `id` as `Joining`.
    pub fn begin_join(
        &mut self,
        id: ParticipantId,
        display_name: Option<String>,
    ) -> Result<(), SignalingError> {
        if !self.is_active {
            return Err(SignalingError::RoomNotFound(self.room_id.to_string()));
        }
        if self.contains(&id) {
            return Err(SignalingError::Conflict(
                "Participant already in room".to_string(),
            ));
        }
        if self.participants.len() >= self.capacity {
            return Err(SignalingError::RoomFull {
                capacity: self.capacity,
            });
        }

        let display_name = self.display_name_for(display_name);
        self.participants.push(Participant {
            id,
            display_name,
            media_state: MediaState::default(),
            connection_state: ConnectionState::Joining,
            joined_at: Utc::now(),
        });
        Ok(())
    }

    /// Promote a `Joining` participant to `Active` and return its new edges,
    /// one per member that was already active.
    pub fn activate(&mut self, id: &ParticipantId) -> Result<Vec<EdgeKey>, SignalingError> {
        let edges: Vec<EdgeKey> = self
            .active_members()
            .filter(|p| &p.id != id)
            .filter_map(|p| EdgeKey::new(p.id.clone(), id.clone()))
            .collect();

        let participant = self
            .get_mut(id)
            .ok_or_else(|| SignalingError::PeerNotInRoom(id.to_string()))?;
        if participant.connection_state != ConnectionState::Joining {
            return Err(SignalingError::Conflict(
                "Participant is not joining".to_string(),
            ));
        }
        participant.connection_state = ConnectionState::Active;
        Ok(edges)
    }

    /// Admit and activate in one step.
    pub fn join(
        &mut self,
        id: ParticipantId,
        display_name: Option<String>,
    ) -> Result<Vec<EdgeKey>, SignalingError> {
        self.begin_join(id.clone(), display_name)?;
        self.activate(&id)
    }

    pub fn mark_disconnected(&mut self, id: &ParticipantId) {
        if let Some(p) = self.get_mut(id) {
            p.connection_state = ConnectionState::Disconnected;
        }
    }

    /// Remove `id`. Returns `None` when it was not a member.
    ///
    /// Deactivates the room when it becomes empty. If the host leaves, the
    /// earliest-joined remaining participant becomes host.
    pub fn leave(&mut self, id: &ParticipantId) -> Option<Departure> {
        let index = self.participants.iter().position(|p| &p.id == id)?;
        let participant = self.participants.remove(index);

        let edges = if participant.connection_state == ConnectionState::Joining {
            Vec::new()
        } else {
            self.active_members()
                .filter_map(|p| EdgeKey::new(p.id.clone(), id.clone()))
                .collect()
        };

        let mut new_host = None;
        if self.participants.is_empty() {
            self.is_active = false;
        } else if &self.host_id == id {
            if let Some(next) = self.participants.first() {
                self.host_id = next.id.clone();
                new_host = Some(next.id.clone());
            }
        }

        Some(Departure {
            participant,
            edges,
            new_host,
        })
    }

    /// Remove everyone and deactivate. Returns the former members in join order.
    pub fn close(&mut self) -> Vec<Participant> {
        self.is_active = false;
        std::mem::take(&mut self.participants)
    }

    /// The edge set implied by current membership.
    #[must_use]
    pub fn expected_edges(&self) -> BTreeSet<EdgeKey> {
        let active: Vec<&ParticipantId> = self.active_members().map(|p| &p.id).collect();
        let mut edges = BTreeSet::new();
        for (i, a) in active.iter().enumerate() {
            for b in active.iter().skip(i + 1) {
                if let Some(key) = EdgeKey::new((*a).clone(), (*b).clone()) {
                    edges.insert(key);
                }
            }
        }
        edges
    }

    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            title: self.title.clone(),
            host_id: self.host_id.clone(),
            participants: self.participants.iter().map(Participant::summary).collect(),
            created_at: self.created_at.to_rfc3339(),
            is_active: self.is_active,
        }
    }
}
