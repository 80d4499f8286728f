//! Screen-share toggle coalescing.
//!
//! The first `isPresenting` change opens a fixed window. Further toggles in
//! the window only update the requested value. When the window closes the
//! final value is compared against the value committed before the window;
//! only a real change yields a trigger.

use common::ParticipantId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct PendingToggle {
    committed: bool,
    requested: bool,
    deadline: Instant,
}

/// A settled presenting change that must be committed and fanned out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenegotiationTrigger {
    pub participant_id: ParticipantId,
    pub is_presenting: bool,
}

/// Per-room debounce of presenting toggles.
#[derive(Debug)]
pub struct RenegotiationCoordinator {
    window: Duration,
    pending: HashMap<ParticipantId, PendingToggle>,
}

impl RenegotiationCoordinator {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record a requested `isPresenting` value for `id`, whose committed value
    /// is `committed`. Returns a trigger immediately only when there is no window
    /// to wait out.
    pub fn toggle(
        &mut self,
        id: &ParticipantId,
        committed: bool,
        requested: bool,
        now: Instant,
    ) -> Option<RenegotiationTrigger> {
        if let Some(pending) = self.pending.get_mut(id) {
            pending.requested = requested;
            return None;
        }
        if requested == committed {
            return None;
        }
        let deadline = match now.checked_add(self.window) {
            Some(deadline) if !self.window.is_zero() => deadline,
            // No window, or one the clock cannot represent: settle now.
            _ => {
                return Some(RenegotiationTrigger {
                    participant_id: id.clone(),
                    is_presenting: requested,
                });
            }
        };
        self.pending.insert(
            id.clone(),
            PendingToggle {
                committed,
                requested,
                deadline,
            },
        );
        None
    }

    /// Close every window whose deadline has passed. Windows that end where
    /// they started are discarded silently.
    pub fn due(&mut self, now: Instant) -> Vec<RenegotiationTrigger> {
        let closed: Vec<ParticipantId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut triggers = Vec::new();
        for id in closed {
            if let Some(p) = self.pending.remove(&id) {
                if p.requested != p.committed {
                    triggers.push(RenegotiationTrigger {
                        participant_id: id,
                        is_presenting: p.requested,
                    });
                }
            }
        }
        triggers.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        triggers
    }

    /// Forget a pending window, e.g. when the participant leaves.
    pub fn cancel(&mut self, id: &ParticipantId) {
        self.pending.remove(id);
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    #[must_use]
    pub fn is_pending(&self, id: &ParticipantId) -> bool {
        self.pending.contains_key(id)
    }
}
