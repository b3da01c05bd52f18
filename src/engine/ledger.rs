//! Participant ledger.
//!
//! Per-bet bookkeeping of who joined, on which side, and their agreement
//! and payment flags. These are plain mutations on the aggregate; the
//! state machine decides when they are legal.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::types::{AgreementProgress, Bet, BetError, BetParticipant};

impl Bet {
    pub fn participant(&self, user_id: &str) -> Option<&BetParticipant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    fn participant_mut(&mut self, user_id: &str) -> Result<&mut BetParticipant, BetError> {
        let bet_id = self.id.clone();
        self.participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or_else(|| BetError::participant_not_found(&bet_id, user_id))
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participant(user_id).is_some()
    }

    /// Append a participant in join order. A user appears at most once.
    pub fn add_participant(
        &mut self,
        user_id: &str,
        display_name: &str,
        side: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<&BetParticipant, BetError> {
        if self.is_participant(user_id) {
            return Err(BetError::Validation(format!(
                "{user_id} has already joined bet {}",
                self.id
            )));
        }
        if !self.has_side(side) {
            return Err(BetError::Validation(format!(
                "unknown side '{side}' for bet {} (sides: {})",
                self.id,
                self.sides.join(", ")
            )));
        }
        self.participants
            .push(BetParticipant::new(user_id, display_name, side, joined_at));
        Ok(&self.participants[self.participants.len() - 1])
    }

    /// Number of distinct sides that have at least one participant.
    pub fn occupied_sides(&self) -> usize {
        self.participants
            .iter()
            .map(|p| p.side.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Everyone except `user_id`, in join order.
    pub fn other_participant_ids(&self, user_id: &str) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.user_id != user_id)
            .map(|p| p.user_id.clone())
            .collect()
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.user_id.clone()).collect()
    }

    /// Record a participant's agreement and, if given, the side they named.
    /// Repeating the call is harmless.
    pub fn mark_agreed(&mut self, user_id: &str, proposed: Option<&str>) -> Result<(), BetError> {
        let participant = self.participant_mut(user_id)?;
        participant.has_agreed = true;
        if let Some(side) = proposed {
            participant.proposed_winner = Some(side.to_string());
        }
        Ok(())
    }

    /// Other participants who named a winner different from `side`.
    pub fn dissenting_proposals(&self, user_id: &str, side: &str) -> Vec<&BetParticipant> {
        self.participants
            .iter()
            .filter(|p| p.user_id != user_id)
            .filter(|p| p.proposed_winner.as_deref().is_some_and(|w| w != side))
            .collect()
    }

    pub fn agreement_progress(&self) -> AgreementProgress {
        AgreementProgress {
            agreed: self.participants.iter().filter(|p| p.has_agreed).count(),
            total: self.participants.len(),
        }
    }

    /// Split participants into (winners, losers) for `winning_side`,
    /// each in join order.
    pub fn partition_by_side(&self, winning_side: &str) -> (Vec<&BetParticipant>, Vec<&BetParticipant>) {
        self.participants.iter().partition(|p| p.side == winning_side)
    }

    /// First participant (by join order) on the winning side: the one all
    /// losers pay. None before resolution or when nobody backed the winner.
    pub fn payee(&self) -> Option<&BetParticipant> {
        let winner = self.winner.as_deref()?;
        self.participants.iter().find(|p| p.side == winner)
    }

    /// Participants who owe money after resolution. Empty before, and
    /// empty when there is no payee to owe.
    pub fn losers(&self) -> Vec<&BetParticipant> {
        match (self.winner.as_deref(), self.payee()) {
            (Some(winner), Some(_)) => self.partition_by_side(winner).1,
            _ => Vec::new(),
        }
    }

    pub fn mark_paid(&mut self, user_id: &str, paid_at: DateTime<Utc>) -> Result<(), BetError> {
        let participant = self.participant_mut(user_id)?;
        if !participant.has_paid {
            participant.has_paid = true;
            participant.paid_at = Some(paid_at);
        }
        Ok(())
    }

    /// True once every loser has paid (vacuously true with no losers).
    pub fn all_losers_paid(&self) -> bool {
        self.losers().iter().all(|p| p.has_paid)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
