//! Canonical peer-pair keys and negotiation roles.

use common::ParticipantId;
use std::fmt;

/// Perfect-negotiation role of one side of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Rolls back its own offer on glare.
    Polite,
    /// Keeps its own offer on glare.
    Impolite,
}

/// Roles of `a` and `b` on their shared edge, in that order.
///
/// The lexicographically smaller id is polite. Callers must not pass equal ids.
#[must_use]
pub fn politeness(a: &ParticipantId, b: &ParticipantId) -> (Role, Role) {
    if a < b {
        (Role::Polite, Role::Impolite)
    } else {
        (Role::Impolite, Role::Polite)
    }
}

/// Direction of travel on an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    LowToHigh,
    HighToLow,
}

/// Unordered participant pair stored as `(min, max)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    low: ParticipantId,
    high: ParticipantId,
}

impl EdgeKey {
    /// Returns `None` for a self-pair.
    #[must_use]
    pub fn new(a: ParticipantId, b: ParticipantId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    #[must_use]
    pub fn low(&self) -> &ParticipantId {
        &self.low
    }

    #[must_use]
    pub fn high(&self) -> &ParticipantId {
        &self.high
    }

    /// The polite side (the smaller id).
    #[must_use]
    pub fn polite(&self) -> &ParticipantId {
        &self.low
    }

    /// The impolite side (the larger id).
    #[must_use]
    pub fn impolite(&self) -> &ParticipantId {
        &self.high
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        &self.low == id || &self.high == id
    }

    /// The other end of the edge, if `id` is one end.
    #[must_use]
    pub fn other(&self, id: &ParticipantId) -> Option<&ParticipantId> {
        if &self.low == id {
            Some(&self.high)
        } else if &self.high == id {
            Some(&self.low)
        } else {
            None
        }
    }

    #[must_use]
    pub fn role_of(&self, id: &ParticipantId) -> Option<Role> {
        if &self.low == id {
            Some(Role::Polite)
        } else if &self.high == id {
            Some(Role::Impolite)
        } else {
            None
        }
    }

    /// Direction of a message sent by `from`.
    #[must_use]
    pub fn direction_from(&self, from: &ParticipantId) -> Option<Direction> {
        if &self.low == from {
            Some(Direction::LowToHigh)
        } else if &self.high == from {
            Some(Direction::HighToLow)
        } else {
            None
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.low, self.high)
    }
}
