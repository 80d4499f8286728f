//! Per-edge perfect-negotiation session.
//!
//! A `NegotiationSession` is pure state: it validates and advances the
//! offer/answer exchange for one edge and keeps the per-direction sequence
//! counters. It never performs I/O; the room actor turns its outcomes into
//! deliveries.
//!
//! ```text
//! Idle ──offer──▶ Offering ──answer──▶ Stable ──renegotiate──▶ Renegotiating
//!  ▲                 ▲                   │                          │
//!  │                 └──────offer────────┴──────────offer───────────┘
//!  └──reset (sequence anomaly / delivery failure)
//! any ──close──▶ Closed
//! ```

use super::edge::{Direction, EdgeKey, Role};
use crate::errors::SignalingError;
use common::ParticipantId;
use serde_json::Value;

/// Negotiation state of one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    Offering,
    Stable,
    Renegotiating,
    Closed,
}

impl NegotiationState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Offering => "offering",
            NegotiationState::Stable => "stable",
            NegotiationState::Renegotiating => "renegotiating",
            NegotiationState::Closed => "closed",
        }
    }
}

/// Offer awaiting an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOffer {
    pub offerer: ParticipantId,
    pub payload: Value,
}

/// Candidate held back until the edge first reaches `Stable`.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedCandidate {
    pub from: ParticipantId,
    pub payload: Value,
}

/// What to do with an accepted offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Relay to the other side.
    Relay,
    /// Glare: the polite side's pending offer was rolled back and this
    /// (impolite) offer replaces it. Relay.
    RelayAfterRollback,
    /// Glare: this (polite) offer loses to the pending impolite offer. Drop.
    IgnoredGlare,
}

/// What to do with an accepted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Relay,
    Buffered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DirectionCounters {
    low_to_high: u64,
    high_to_low: u64,
}

impl DirectionCounters {
    fn get(&self, dir: Direction) -> u64 {
        match dir {
            Direction::LowToHigh => self.low_to_high,
            Direction::HighToLow => self.high_to_low,
        }
    }

    fn get_mut(&mut self, dir: Direction) -> &mut u64 {
        match dir {
            Direction::LowToHigh => &mut self.low_to_high,
            Direction::HighToLow => &mut self.high_to_low,
        }
    }
}

/// Negotiation state for one `EdgeKey`.
#[derive(Debug, Clone)]
pub struct NegotiationSession {
    key: EdgeKey,
    state: NegotiationState,
    pending_offer: Option<PendingOffer>,
    /// Set the first time the edge reaches `Stable` after creation or reset.
    established: bool,
    buffered: Vec<BufferedCandidate>,
    /// Last client-supplied sequence accepted per direction.
    received: DirectionCounters,
    /// Last server-stamped delivery sequence per direction.
    stamped: DirectionCounters,
}

impl NegotiationSession {
    #[must_use]
    pub fn new(key: EdgeKey) -> Self {
        Self {
            key,
            state: NegotiationState::Idle,
            pending_offer: None,
            established: false,
            buffered: Vec::new(),
            received: DirectionCounters::default(),
            stamped: DirectionCounters::default(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &EdgeKey {
        &self.key
    }

    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    #[must_use]
    pub fn pending_offer(&self) -> Option<&PendingOffer> {
        self.pending_offer.as_ref()
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    #[must_use]
    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Last accepted client sequence from `from`.
    #[must_use]
    pub fn last_received(&self, from: &ParticipantId) -> Option<u64> {
        self.key
            .direction_from(from)
            .map(|dir| self.received.get(dir))
    }

    fn direction(&self, from: &ParticipantId) -> Result<Direction, SignalingError> {
        self.key
            .direction_from(from)
            .ok_or_else(|| SignalingError::NoSuchEdge(self.key.to_string()))
    }

    fn ensure_open(&self) -> Result<(), SignalingError> {
        if self.state == NegotiationState::Closed {
            return Err(SignalingError::NoSuchEdge(self.key.to_string()));
        }
        Ok(())
    }

    /// Validate a client-supplied sequence from `from`.
    ///
    /// Accepts exactly `last + 1`. On a gap or repeat the baseline moves to
    /// `max(last, received)` so the next in-order message after a reset is
    /// accepted, and `SequenceGap` is returned. The caller resets the edge.
    pub fn check_sequence(&mut self, from: &ParticipantId, sequence: u64) -> Result<(), SignalingError> {
        self.ensure_open()?;
        let dir = self.direction(from)?;
        let last = self.received.get(dir);
        let expected = last.saturating_add(1);
        if sequence == expected {
            *self.received.get_mut(dir) = sequence;
            return Ok(());
        }
        *self.received.get_mut(dir) = last.max(sequence);
        Err(SignalingError::SequenceGap {
            expected,
            received: sequence,
        })
    }

    /// Next delivery sequence for a message sent by `from`.
    pub fn stamp(&mut self, from: &ParticipantId) -> Result<u64, SignalingError> {
        let dir = self.direction(from)?;
        let next = self.stamped.get(dir).saturating_add(1);
        *self.stamped.get_mut(dir) = next;
        Ok(next)
    }

    /// Apply an offer from `from`.
    pub fn apply_offer(
        &mut self,
        from: &ParticipantId,
        payload: Value,
    ) -> Result<OfferOutcome, SignalingError> {
        self.ensure_open()?;
        self.direction(from)?;

        match self.state {
            NegotiationState::Idle | NegotiationState::Stable | NegotiationState::Renegotiating => {
                self.pending_offer = Some(PendingOffer {
                    offerer: from.clone(),
                    payload,
                });
                self.state = NegotiationState::Offering;
                Ok(OfferOutcome::Relay)
            }
            NegotiationState::Offering => {
                let pending_from_sender = self
                    .pending_offer
                    .as_ref()
                    .is_some_and(|p| &p.offerer == from);

                if pending_from_sender {
                    // Same side re-offering before an answer: latest offer wins.
                    self.pending_offer = Some(PendingOffer {
                        offerer: from.clone(),
                        payload,
                    });
                    return Ok(OfferOutcome::Relay);
                }

                match self.key.role_of(from) {
                    Some(Role::Impolite) => {
                        self.pending_offer = Some(PendingOffer {
                            offerer: from.clone(),
                            payload,
                        });
                        Ok(OfferOutcome::RelayAfterRollback)
                    }
                    Some(Role::Polite) => Ok(OfferOutcome::IgnoredGlare),
                    None => Err(SignalingError::NoSuchEdge(self.key.to_string())),
                }
            }
            NegotiationState::Closed => Err(SignalingError::NoSuchEdge(self.key.to_string())),
        }
    }

    /// Apply an answer from `from`. Returns the candidates to flush, in
    /// arrival order, when this is the first time the edge becomes `Stable`.
    pub fn apply_answer(
        &mut self,
        from: &ParticipantId,
    ) -> Result<Vec<BufferedCandidate>, SignalingError> {
        self.ensure_open()?;
        self.direction(from)?;

        let answering_pending = self.state == NegotiationState::Offering
            && self
                .pending_offer
                .as_ref()
                .is_some_and(|p| &p.offerer != from);
        if !answering_pending {
            return Err(SignalingError::UnexpectedMessage(format!(
                "No offer awaiting an answer (state: {})",
                self.state.as_str()
            )));
        }

        self.pending_offer = None;
        self.state = NegotiationState::Stable;

        if self.established {
            return Ok(Vec::new());
        }
        self.established = true;
        Ok(std::mem::take(&mut self.buffered))
    }

    /// Apply a connectivity candidate from `from`.
    pub fn apply_candidate(
        &mut self,
        from: &ParticipantId,
        payload: Value,
    ) -> Result<CandidateOutcome, SignalingError> {
        self.ensure_open()?;
        self.direction(from)?;

        if self.established {
            return Ok(CandidateOutcome::Relay);
        }
        self.buffered.push(BufferedCandidate {
            from: from.clone(),
            payload,
        });
        Ok(CandidateOutcome::Buffered)
    }

    /// Flag a settled edge for renegotiation. Returns whether the state changed.
    pub fn mark_renegotiating(&mut self) -> bool {
        if self.state == NegotiationState::Stable {
            self.state = NegotiationState::Renegotiating;
            return true;
        }
        false
    }

    /// Drop all in-flight negotiation and return to `Idle`.
    ///
    /// Sequence counters survive: delivery sequences stay strictly increasing
    /// and the inbound baseline was already resynchronized.
    pub fn reset(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }
        self.state = NegotiationState::Idle;
        self.pending_offer = None;
        self.established = false;
        self.buffered.clear();
    }

    pub fn close(&mut self) {
        self.state = NegotiationState::Closed;
        self.pending_offer = None;
        self.buffered.clear();
    }
}
