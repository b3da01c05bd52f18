//! Shared types for the wager engine.
//!
//! These types form the data model used across all modules. The `Bet`
//! aggregate is the unit of persistence and concurrency: every command
//! loads one, mutates a copy, and writes it back conditioned on its version.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque bet identifier (UUID v4 string).
pub type BetId = String;

/// Opaque user identifier supplied by the identity layer.
pub type UserId = String;

/// `resolved_by` value recorded when a bet resolves through consensus.
pub const CONSENSUS_RESOLVER: &str = "consensus";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Pending,
    Active,
    AwaitingResolution,
    Resolved,
    Completed,
    /// Reserved: no command enters this state yet.
    Cancelled,
    /// Reserved: no command enters this state yet.
    Disputed,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Pending => "pending",
            BetStatus::Active => "active",
            BetStatus::AwaitingResolution => "awaiting_resolution",
            BetStatus::Resolved => "resolved",
            BetStatus::Completed => "completed",
            BetStatus::Cancelled => "cancelled",
            BetStatus::Disputed => "disputed",
        }
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// The `cancelled` and `disputed` edges are part of the table so that
    /// future commands can use them, but nothing in the engine takes them.
    pub fn can_transition_to(&self, next: BetStatus) -> bool {
        use BetStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, AwaitingResolution)
                | (Active, AwaitingResolution)
                | (AwaitingResolution, Resolved)
                | (Resolved, Completed)
                | (Pending | Active | AwaitingResolution, Cancelled)
                | (AwaitingResolution | Resolved, Disputed)
        )
    }

    /// Whether new participants may join.
    pub fn accepts_joins(&self) -> bool {
        matches!(self, BetStatus::Pending | BetStatus::Active)
    }

    /// Whether evidence may still be attached.
    pub fn accepts_evidence(&self) -> bool {
        matches!(
            self,
            BetStatus::Pending | BetStatus::Active | BetStatus::AwaitingResolution
        )
    }

    /// Logically retired: no further transitions are modeled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BetStatus::Completed | BetStatus::Cancelled)
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which resolution protocol decides the winner. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    NeutralParty,
    EveryoneAgrees,
}

impl fmt::Display for ResolutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionType::NeutralParty => write!(f, "neutral_party"),
            ResolutionType::EveryoneAgrees => write!(f, "everyone_agrees"),
        }
    }
}

/// Command being attempted; carried in rejections for caller context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetAction {
    Join,
    Resolve,
    Agree,
    SubmitEvidence,
    RecordPayment,
}

impl fmt::Display for BetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetAction::Join => write!(f, "join"),
            BetAction::Resolve => write!(f, "resolve"),
            BetAction::Agree => write!(f, "agree on"),
            BetAction::SubmitEvidence => write!(f, "submit evidence to"),
            BetAction::RecordPayment => write!(f, "record payment on"),
        }
    }
}

/// Role a caller must hold for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The creator or the designated neutral party.
    Arbiter,
    Participant,
    /// A participant or the designated neutral party.
    ParticipantOrNeutralParty,
    LosingParticipant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Arbiter => write!(f, "creator or neutral party"),
            Role::Participant => write!(f, "participant"),
            Role::ParticipantOrNeutralParty => write!(f, "participant or neutral party"),
            Role::LosingParticipant => write!(f, "losing participant"),
        }
    }
}

/// Kind of supporting material attached to a bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Text,
    Photo,
    Link,
    Video,
}

/// Settlement state of a payment obligation, owned by the payment side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

// ---------------------------------------------------------------------------
// Bet aggregate
// ---------------------------------------------------------------------------

/// One user's position in a bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetParticipant {
    pub user_id: UserId,
    pub display_name: String,
    pub side: String,
    /// Only meaningful under `everyone_agrees`.
    pub has_agreed: bool,
    /// Side this participant named when agreeing, if any.
    #[serde(default)]
    pub proposed_winner: Option<String>,
    pub has_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

impl BetParticipant {
    pub fn new(user_id: &str, display_name: &str, side: &str, joined_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            side: side.to_string(),
            has_agreed: false,
            proposed_winner: None,
            has_paid: false,
            paid_at: None,
            joined_at,
        }
    }
}

/// Append-only supporting material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub submitted_by: UserId,
    #[serde(rename = "type")]
    pub kind: EvidenceKind,
    pub content: String,
    pub submitted_at: DateTime<Utc>,
}

/// The aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub title: String,
    pub description: String,
    /// Stake per participant.
    pub amount: Decimal,
    /// Fixed at creation from `amount`; never recomputed.
    pub facilitation_fee: Decimal,
    pub status: BetStatus,
    pub resolution_type: ResolutionType,
    pub neutral_party: Option<UserId>,
    /// Declared side labels, in declaration order.
    pub sides: Vec<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    /// Join order; the creator is always first.
    pub participants: Vec<BetParticipant>,
    pub winner: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub evidence: Vec<Evidence>,
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (${:.2} | fee ${:.2} | {} | {} participants)",
            self.status,
            self.title,
            self.amount,
            self.facilitation_fee,
            self.resolution_type,
            self.participants.len(),
        )?;
        if let Some(ref winner) = self.winner {
            write!(f, " winner={winner}")?;
        }
        Ok(())
    }
}

impl Bet {
    /// Whether `side` is one of the declared sides.
    pub fn has_side(&self, side: &str) -> bool {
        self.sides.iter().any(|s| s == side)
    }

    pub fn is_creator(&self, user_id: &str) -> bool {
        self.created_by == user_id
    }

    pub fn is_neutral_party(&self, user_id: &str) -> bool {
        self.neutral_party.as_deref() == Some(user_id)
    }

    /// Winner, resolution time and resolver are set together or not at all.
    pub fn resolution_is_consistent(&self) -> bool {
        let set = [
            self.winner.is_some(),
            self.resolved_at.is_some(),
            self.resolved_by.is_some(),
        ];
        set.iter().all(|s| *s) || set.iter().all(|s| !*s)
    }

    /// Move to `next`, rejecting edges the lifecycle doesn't allow.
    pub fn transition_to(&mut self, next: BetStatus, action: BetAction) -> Result<(), BetError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(BetError::illegal(
                self,
                action,
                format!("no transition from {} to {next}", self.status),
            ));
        }
        self.status = next;
        Ok(())
    }
}

/// Input to `create_bet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub amount: Decimal,
    pub sides: Vec<String>,
    pub resolution_type: ResolutionType,
    #[serde(default)]
    pub neutral_party: Option<UserId>,
    pub creator_id: UserId,
    pub creator_display_name: String,
}

// ---------------------------------------------------------------------------
// Settlement output
// ---------------------------------------------------------------------------

/// Money one loser owes the designated winner. Persisted externally as a
/// payment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentObligation {
    pub id: String,
    pub bet_id: BetId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount: Decimal,
    /// Informational platform charge shown to the payer; not transferred.
    pub fee: Decimal,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for PaymentObligation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} owes {} ${:.2} (fee ${:.2}) for bet {} [{:?}]",
            self.from_user_id, self.to_user_id, self.amount, self.fee, self.bet_id, self.status,
        )
    }
}

/// How far a consensus bet is toward unanimity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementProgress {
    pub agreed: usize,
    pub total: usize,
}

impl AgreementProgress {
    pub fn is_unanimous(&self) -> bool {
        self.total > 0 && self.agreed == self.total
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Every rejection an engine operation can produce.
#[derive(Debug, thiserror::Error)]
pub enum BetError {
    #[error("cannot {action} bet {bet_id} (status: {status}): {reason}")]
    IllegalTransition {
        bet_id: BetId,
        action: BetAction,
        status: BetStatus,
        reason: String,
        required_role: Option<Role>,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("bet {bet_id} was modified concurrently; gave up after {attempts} attempts")]
    ConcurrencyConflict { bet_id: BetId, attempts: u32 },

    #[error("downstream delivery failed ({target}): {message}")]
    DownstreamFailure { target: String, message: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl BetError {
    pub(crate) fn illegal(bet: &Bet, action: BetAction, reason: impl Into<String>) -> Self {
        BetError::IllegalTransition {
            bet_id: bet.id.clone(),
            action,
            status: bet.status,
            reason: reason.into(),
            required_role: None,
        }
    }

    pub(crate) fn forbidden(bet: &Bet, action: BetAction, actor: &str, role: Role) -> Self {
        BetError::IllegalTransition {
            bet_id: bet.id.clone(),
            action,
            status: bet.status,
            reason: format!("{actor} is not the {role}"),
            required_role: Some(role),
        }
    }

    pub(crate) fn bet_not_found(id: &str) -> Self {
        BetError::NotFound { entity: "bet", id: id.to_string() }
    }

    pub(crate) fn participant_not_found(bet_id: &str, user_id: &str) -> Self {
        BetError::NotFound {
            entity: "participant",
            id: format!("{user_id} in bet {bet_id}"),
        }
    }

    /// Short machine-readable tag for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            BetError::IllegalTransition { .. } => "illegal_transition",
            BetError::NotFound { .. } => "not_found",
            BetError::Validation(_) => "validation_error",
            BetError::ConcurrencyConflict { .. } => "concurrency_conflict",
            BetError::DownstreamFailure { .. } => "downstream_failure",
            BetError::Storage(_) => "storage_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
