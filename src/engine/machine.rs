//! Bet state machine.
//!
//! Pure transitions on a `Bet` value: no I/O, no clocks beyond the `now`
//! passed in. The service runs these inside its optimistic read-modify-write
//! loop, so a transition may be evaluated more than once against fresher
//! copies of the bet; only the copy that wins the write takes effect.
//!
//! ```text
//! pending ──join──▶ active ──join (2nd side)──▶ awaiting_resolution
//!    └──────join (2nd side)──────────────────────────┘        │
//!                              resolve / agree (unanimous) ───┘
//!                                          ▼
//!                                      resolved ──all losers paid──▶ completed
//! ```

use chrono::{DateTime, Utc};
use tracing::debug;

use super::fees::FeeSchedule;
use super::resolution::{protocol_for, Verdict};
use crate::notify::{Notification, NotificationEvent};
use crate::types::{
    AgreementProgress, Bet, BetAction, BetError, BetParticipant, BetStatus, Evidence,
    EvidenceKind, NewBet, ResolutionType, Role,
};

/// Result of an `agree` transition.
#[derive(Debug, Clone, PartialEq)]
pub enum AgreeEffect {
    Recorded(AgreementProgress),
    Resolved,
}

// ---------------------------------------------------------------------------
// create
// ---------------------------------------------------------------------------

fn validate_new_bet(new: &NewBet) -> Result<(), BetError> {
    if new.title.trim().is_empty() {
        return Err(BetError::Validation("title must not be blank".into()));
    }
    if new.amount <= rust_decimal::Decimal::ZERO {
        return Err(BetError::Validation(format!(
            "amount must be positive, got {}",
            new.amount
        )));
    }
    if new.creator_id.trim().is_empty() {
        return Err(BetError::Validation("creator id must not be blank".into()));
    }
    if new.sides.len() < 2 {
        return Err(BetError::Validation("a bet needs at least two sides".into()));
    }
    for (i, side) in new.sides.iter().enumerate() {
        if side.trim().is_empty() {
            return Err(BetError::Validation(format!("side #{i} is blank")));
        }
        if new.sides[..i].contains(side) {
            return Err(BetError::Validation(format!("side '{side}' is declared twice")));
        }
    }
    match (new.resolution_type, new.neutral_party.as_deref()) {
        (ResolutionType::NeutralParty, None) => Err(BetError::Validation(
            "neutral_party resolution requires a neutral party".into(),
        )),
        (ResolutionType::NeutralParty, Some(np)) if np == new.creator_id => Err(
            BetError::Validation("the creator cannot be the neutral party".into()),
        ),
        (ResolutionType::EveryoneAgrees, Some(_)) => Err(BetError::Validation(
            "everyone_agrees resolution does not take a neutral party".into(),
        )),
        _ => Ok(()),
    }
}

/// Build a new bet in `pending` with the creator on the first side.
pub fn create(
    id: String,
    new: NewBet,
    fees: &FeeSchedule,
    now: DateTime<Utc>,
) -> Result<(Bet, Vec<Notification>), BetError> {
    validate_new_bet(&new)?;

    let creator = BetParticipant::new(&new.creator_id, &new.creator_display_name, &new.sides[0], now);
    let bet = Bet {
        id,
        title: new.title,
        description: new.description,
        amount: new.amount,
        facilitation_fee: fees.fee(new.amount),
        status: BetStatus::Pending,
        resolution_type: new.resolution_type,
        neutral_party: new.neutral_party,
        sides: new.sides,
        created_by: new.creator_id,
        created_at: now,
        participants: vec![creator],
        winner: None,
        resolved_at: None,
        resolved_by: None,
        evidence: Vec::new(),
    };

    let mut effects = vec![Notification::for_bet(
        NotificationEvent::BetCreated,
        vec![bet.created_by.clone()],
        &bet,
    )
    .with("amount", bet.amount.to_string())
    .with("fee", bet.facilitation_fee.to_string())];

    if let Some(ref np) = bet.neutral_party {
        effects.push(
            Notification::for_bet(NotificationEvent::NeutralPartyAssigned, vec![np.clone()], &bet)
                .with("created_by", bet.created_by.clone()),
        );
    }

    Ok((bet, effects))
}

// ---------------------------------------------------------------------------
// join
// ---------------------------------------------------------------------------

/// Add `user_id` on `side`. Moves to `awaiting_resolution` once two or more
/// sides are occupied, otherwise to (or stays in) `active`.
pub fn join(
    bet: &mut Bet,
    user_id: &str,
    display_name: &str,
    side: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Notification>, BetError> {
    if !bet.status.accepts_joins() {
        return Err(BetError::illegal(bet, BetAction::Join, "bet is no longer open to joins"));
    }
    if bet.is_neutral_party(user_id) {
        return Err(BetError::Validation(format!(
            "{user_id} is the neutral party of bet {} and cannot take a side",
            bet.id
        )));
    }

    bet.add_participant(user_id, display_name, side, now)?;

    let next = if bet.occupied_sides() >= 2 {
        BetStatus::AwaitingResolution
    } else {
        BetStatus::Active
    };
    let previous = bet.status;
    bet.transition_to(next, BetAction::Join)?;
    debug!(bet_id = %bet.id, user_id, side, from = %previous, to = %next, "Join applied");

    let mut effects = vec![Notification::for_bet(
        NotificationEvent::BetJoined,
        bet.other_participant_ids(user_id),
        bet,
    )
    .with("joined_user_id", user_id)
    .with("display_name", display_name)
    .with("side", side)];

    if previous != BetStatus::AwaitingResolution && next == BetStatus::AwaitingResolution {
        if let (ResolutionType::NeutralParty, Some(np)) = (bet.resolution_type, bet.neutral_party.as_ref()) {
            effects.push(Notification::for_bet(
                NotificationEvent::BetReadyForResolution,
                vec![np.clone()],
                bet,
            ));
        }
    }

    Ok(effects)
}

// ---------------------------------------------------------------------------
// resolve / agree
// ---------------------------------------------------------------------------

fn apply_verdict(bet: &mut Bet, winner: String, resolved_by: String, now: DateTime<Utc>, action: BetAction) -> Result<(), BetError> {
    bet.transition_to(BetStatus::Resolved, action)?;
    bet.winner = Some(winner);
    bet.resolved_at = Some(now);
    bet.resolved_by = Some(resolved_by);
    Ok(())
}

/// Single-arbiter declaration under `neutral_party`.
pub fn resolve(bet: &mut Bet, winning_side: &str, actor_id: &str, now: DateTime<Utc>) -> Result<(), BetError> {
    match protocol_for(bet.resolution_type).declare(bet, actor_id, winning_side)? {
        Verdict::Declare { winner, resolved_by } => {
            apply_verdict(bet, winner, resolved_by, now, BetAction::Resolve)
        }
        Verdict::Undecided => Err(BetError::illegal(bet, BetAction::Resolve, "no winner declared")),
    }
}

/// Agreement signal under `everyone_agrees`.
pub fn agree(
    bet: &mut Bet,
    user_id: &str,
    winning_side: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AgreeEffect, BetError> {
    match protocol_for(bet.resolution_type).agree(bet, user_id, winning_side)? {
        Verdict::Declare { winner, resolved_by } => {
            apply_verdict(bet, winner, resolved_by, now, BetAction::Agree)?;
            Ok(AgreeEffect::Resolved)
        }
        Verdict::Undecided => Ok(AgreeEffect::Recorded(bet.agreement_progress())),
    }
}

// ---------------------------------------------------------------------------
// evidence / payments
// ---------------------------------------------------------------------------

/// Append evidence. Has no effect on status.
pub fn submit_evidence(
    bet: &mut Bet,
    user_id: &str,
    kind: EvidenceKind,
    content: &str,
    now: DateTime<Utc>,
) -> Result<Evidence, BetError> {
    if !bet.is_participant(user_id) && !bet.is_neutral_party(user_id) {
        return Err(BetError::forbidden(
            bet,
            BetAction::SubmitEvidence,
            user_id,
            Role::ParticipantOrNeutralParty,
        ));
    }
    if !bet.status.accepts_evidence() {
        return Err(BetError::illegal(
            bet,
            BetAction::SubmitEvidence,
            "evidence is closed once a bet is resolved",
        ));
    }
    if content.trim().is_empty() {
        return Err(BetError::Validation("evidence content must not be blank".into()));
    }

    let evidence = Evidence {
        submitted_by: user_id.to_string(),
        kind,
        content: content.to_string(),
        submitted_at: now,
    };
    bet.evidence.push(evidence.clone());
    Ok(evidence)
}

/// Mark a loser's payment as made. Returns true when this completed the bet.
pub fn record_payment(bet: &mut Bet, user_id: &str, now: DateTime<Utc>) -> Result<bool, BetError> {
    if bet.status != BetStatus::Resolved {
        return Err(BetError::illegal(
            bet,
            BetAction::RecordPayment,
            "payments are recorded only on resolved bets",
        ));
    }
    if !bet.is_participant(user_id) {
        return Err(BetError::participant_not_found(&bet.id, user_id));
    }
    // Nobody backed the winning side, so settlement created no obligations
    // and the bet stays resolved.
    if bet.payee().is_none() {
        return Err(BetError::illegal(
            bet,
            BetAction::RecordPayment,
            "nobody backed the winning side; no payment is owed",
        ));
    }
    if !bet.losers().iter().any(|p| p.user_id == user_id) {
        return Err(BetError::forbidden(
            bet,
            BetAction::RecordPayment,
            user_id,
            Role::LosingParticipant,
        ));
    }

    bet.mark_paid(user_id, now)?;
    if bet.all_losers_paid() {
        bet.transition_to(BetStatus::Completed, BetAction::RecordPayment)?;
        return Ok(true);
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
