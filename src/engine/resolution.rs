//! Resolution protocols.
//!
//! Two interchangeable strategies decide when and what winner a bet
//! declares, selected by the bet's `resolution_type`:
//! - `NeutralParty`: the creator or the designated neutral party declares
//!   the winner in a single call.
//! - `EveryoneAgrees`: every participant signals agreement; the call that
//!   completes unanimity (or any later call once unanimity holds) and names
//!   a side resolves the bet, unless another participant proposed a
//!   different side. Proposals can be revised by agreeing again.
//!
//! Protocols only decide. Applying the verdict to the aggregate is the
//! state machine's job.

use crate::types::{
    Bet, BetAction, BetError, BetStatus, ResolutionType, Role, CONSENSUS_RESOLVER,
};

/// What a protocol concluded from one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Input recorded, no winner yet.
    Undecided,
    /// Resolve now with this winner, attributed to `resolved_by`.
    Declare { winner: String, resolved_by: String },
}

/// Contract shared by both protocols.
pub trait ResolutionProtocol: Send + Sync {
    fn kind(&self) -> ResolutionType;

    /// A single actor declares the winner directly.
    fn declare(&self, bet: &Bet, actor_id: &str, winning_side: &str) -> Result<Verdict, BetError>;

    /// A participant signals agreement, optionally naming the winner.
    /// May update the participant's agreement flags on `bet`.
    fn agree(
        &self,
        bet: &mut Bet,
        user_id: &str,
        winning_side: Option<&str>,
    ) -> Result<Verdict, BetError>;
}

/// Protocol for a bet's resolution type.
pub fn protocol_for(kind: ResolutionType) -> &'static dyn ResolutionProtocol {
    match kind {
        ResolutionType::NeutralParty => &NeutralParty,
        ResolutionType::EveryoneAgrees => &EveryoneAgrees,
    }
}

fn require_awaiting(bet: &Bet, action: BetAction) -> Result<(), BetError> {
    if bet.status != BetStatus::AwaitingResolution {
        return Err(BetError::illegal(
            bet,
            action,
            "bet is not awaiting resolution",
        ));
    }
    Ok(())
}

fn require_declared_side(bet: &Bet, side: &str) -> Result<(), BetError> {
    if !bet.has_side(side) {
        return Err(BetError::Validation(format!(
            "'{side}' is not a side of bet {} (sides: {})",
            bet.id,
            bet.sides.join(", ")
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Neutral party
// ---------------------------------------------------------------------------

pub struct NeutralParty;

impl ResolutionProtocol for NeutralParty {
    fn kind(&self) -> ResolutionType {
        ResolutionType::NeutralParty
    }

    fn declare(&self, bet: &Bet, actor_id: &str, winning_side: &str) -> Result<Verdict, BetError> {
        // Role is checked before status so that outsiders are always told
        // they lack authority.
        if !bet.is_creator(actor_id) && !bet.is_neutral_party(actor_id) {
            return Err(BetError::forbidden(bet, BetAction::Resolve, actor_id, Role::Arbiter));
        }
        require_awaiting(bet, BetAction::Resolve)?;
        require_declared_side(bet, winning_side)?;
        Ok(Verdict::Declare {
            winner: winning_side.to_string(),
            resolved_by: actor_id.to_string(),
        })
    }

    fn agree(
        &self,
        bet: &mut Bet,
        _user_id: &str,
        _winning_side: Option<&str>,
    ) -> Result<Verdict, BetError> {
        Err(BetError::illegal(
            bet,
            BetAction::Agree,
            "bet is resolved by its neutral party, not by agreement",
        ))
    }
}

// ---------------------------------------------------------------------------
// Everyone agrees
// ---------------------------------------------------------------------------

pub struct EveryoneAgrees;

impl ResolutionProtocol for EveryoneAgrees {
    fn kind(&self) -> ResolutionType {
        ResolutionType::EveryoneAgrees
    }

    fn declare(&self, bet: &Bet, _actor_id: &str, _winning_side: &str) -> Result<Verdict, BetError> {
        Err(BetError::illegal(
            bet,
            BetAction::Resolve,
            "bet resolves by unanimous agreement; no single actor may declare a winner",
        ))
    }

    fn agree(
        &self,
        bet: &mut Bet,
        user_id: &str,
        winning_side: Option<&str>,
    ) -> Result<Verdict, BetError> {
        require_awaiting(bet, BetAction::Agree)?;
        if !bet.is_participant(user_id) {
            return Err(BetError::forbidden(bet, BetAction::Agree, user_id, Role::Participant));
        }
        if let Some(side) = winning_side {
            require_declared_side(bet, side)?;
        }

        // Everyone else has already agreed, so this call would settle it.
        let completes = bet
            .participants
            .iter()
            .all(|p| p.has_agreed || p.user_id == user_id);
        if let (Some(side), true) = (winning_side, completes) {
            let dissent = bet.dissenting_proposals(user_id, side);
            if !dissent.is_empty() {
                let names: Vec<_> = dissent
                    .iter()
                    .map(|p| {
                        let proposed = p.proposed_winner.as_deref().unwrap_or_default();
                        format!("{} proposed '{proposed}'", p.user_id)
                    })
                    .collect();
                return Err(BetError::illegal(
                    bet,
                    BetAction::Agree,
                    format!("participants disagree on the winner: {}", names.join(", ")),
                ));
            }
        }

        bet.mark_agreed(user_id, winning_side)?;

        match winning_side {
            Some(side) if completes => Ok(Verdict::Declare {
                winner: side.to_string(),
                resolved_by: CONSENSUS_RESOLVER.to_string(),
            }),
            _ => Ok(Verdict::Undecided),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
