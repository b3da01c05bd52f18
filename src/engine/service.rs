//! Bet service — the command/query API.
//!
//! Stateless apart from its injected gateways. Every command runs an
//! optimistic read-modify-write loop against the `BetStore`:
//!
//! 1. load the bet and its version
//! 2. apply the pure transition from `machine` to a copy
//! 3. conditionally save; on a version conflict reload and go again
//!
//! Because the transition is re-evaluated against the fresh copy on every
//! attempt, a losing `resolve` sees `resolved` on its retry and is rejected.
//! Settlement fan-out runs only for the caller whose write moved the bet
//! into `resolved`, which is what makes it exactly-once.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::fees::FeeSchedule;
use super::machine::{self, AgreeEffect};
use super::settlement::{self, SettlementReport};
use crate::notify::Outbox;
use crate::retry::RetryPolicy;
use crate::storage::{BetStore, ObligationSink, SaveOutcome, VersionedBet};
use crate::types::{
    AgreementProgress, Bet, BetAction, BetError, BetStatus, Evidence, EvidenceKind, NewBet,
    PaymentObligation, PaymentStatus,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Extra attempts after a lost version race before giving up.
    pub max_conflict_retries: u32,
    /// Backoff for post-commit side effects.
    #[serde(default)]
    pub downstream_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            downstream_retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A committed resolution and what fan-out did with it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub bet: Bet,
    pub settlement: SettlementReport,
}

#[derive(Debug, Clone)]
pub enum AgreeOutcome {
    /// Agreement stored; bet still awaiting resolution.
    Recorded { bet: Bet, progress: AgreementProgress },
    /// This call resolved the bet.
    Resolved(Resolution),
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct BetService {
    store: Arc<dyn BetStore>,
    sink: Arc<dyn ObligationSink>,
    outbox: Outbox,
    fees: FeeSchedule,
    config: EngineConfig,
}

fn storage_err(e: anyhow::Error) -> BetError {
    BetError::Storage(format!("{e:#}"))
}

impl BetService {
    pub fn new(
        store: Arc<dyn BetStore>,
        sink: Arc<dyn ObligationSink>,
        outbox: Outbox,
        fees: FeeSchedule,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            sink,
            outbox,
            fees,
            config,
        }
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Fee for a prospective stake, without creating anything.
    pub fn compute_facilitation_fee(&self, amount: Decimal) -> Result<Decimal, BetError> {
        if amount < Decimal::ZERO {
            return Err(BetError::Validation(format!(
                "amount must not be negative, got {amount}"
            )));
        }
        Ok(self.fees.fee(amount))
    }

    // -- Commands ---------------------------------------------------------

    pub async fn create_bet(&self, new: NewBet) -> Result<Bet, BetError> {
        let id = uuid::Uuid::new_v4().to_string();
        let (bet, effects) = machine::create(id, new, &self.fees, Utc::now())?;

        self.store.insert(&bet).await.map_err(storage_err)?;

        info!(
            bet_id = %bet.id,
            creator = %bet.created_by,
            amount = %bet.amount,
            fee = %bet.facilitation_fee,
            resolution = %bet.resolution_type,
            "Bet created"
        );
        self.outbox.send_all(effects);
        Ok(bet)
    }

    pub async fn join_bet(
        &self,
        bet_id: &str,
        user_id: &str,
        display_name: &str,
        side: &str,
    ) -> Result<Bet, BetError> {
        let (bet, effects) = self
            .mutate(bet_id, BetAction::Join, |bet| {
                machine::join(bet, user_id, display_name, side, Utc::now())
            })
            .await?;

        info!(bet_id, user_id, side, status = %bet.status, "Participant joined");
        self.outbox.send_all(effects);
        Ok(bet)
    }

    pub async fn resolve_bet(
        &self,
        bet_id: &str,
        winning_side: &str,
        actor_id: &str,
    ) -> Result<Resolution, BetError> {
        let (bet, ()) = self
            .mutate(bet_id, BetAction::Resolve, |bet| {
                machine::resolve(bet, winning_side, actor_id, Utc::now())
            })
            .await?;

        info!(bet_id, winner = winning_side, actor_id, "Bet resolved by declaration");
        let settlement = self.settle(&bet).await;
        Ok(Resolution { bet, settlement })
    }

    pub async fn agree_to_resolution(
        &self,
        bet_id: &str,
        user_id: &str,
        winning_side: Option<&str>,
    ) -> Result<AgreeOutcome, BetError> {
        let (bet, effect) = self
            .mutate(bet_id, BetAction::Agree, |bet| {
                machine::agree(bet, user_id, winning_side, Utc::now())
            })
            .await?;

        match effect {
            AgreeEffect::Recorded(progress) => {
                info!(
                    bet_id,
                    user_id,
                    agreed = progress.agreed,
                    total = progress.total,
                    "Agreement recorded"
                );
                Ok(AgreeOutcome::Recorded { bet, progress })
            }
            AgreeEffect::Resolved => {
                info!(bet_id, winner = ?bet.winner, "Bet resolved by consensus");
                let settlement = self.settle(&bet).await;
                Ok(AgreeOutcome::Resolved(Resolution { bet, settlement }))
            }
        }
    }

    pub async fn submit_evidence(
        &self,
        bet_id: &str,
        user_id: &str,
        kind: EvidenceKind,
        content: &str,
    ) -> Result<Evidence, BetError> {
        let (_, evidence) = self
            .mutate(bet_id, BetAction::SubmitEvidence, |bet| {
                machine::submit_evidence(bet, user_id, kind, content, Utc::now())
            })
            .await?;
        debug!(bet_id, user_id, kind = ?kind, "Evidence submitted");
        Ok(evidence)
    }

    /// Mark a loser as paid; completes the bet once all losers have paid.
    pub async fn record_payment(&self, bet_id: &str, user_id: &str) -> Result<Bet, BetError> {
        let (bet, completed) = self
            .mutate(bet_id, BetAction::RecordPayment, |bet| {
                machine::record_payment(bet, user_id, Utc::now())
            })
            .await?;
        info!(bet_id, user_id, completed, "Payment recorded");

        // The bet is the record of truth; the request status follows it.
        let obligation_id = settlement::obligation_id(bet_id, user_id);
        match self.sink.set_obligation_status(&obligation_id, PaymentStatus::Completed).await {
            Ok(true) => {}
            Ok(false) => warn!(bet_id, %obligation_id, "Payment recorded with no request on file"),
            Err(e) => warn!(
                bet_id,
                %obligation_id,
                error = %format!("{e:#}"),
                "Could not mark payment request completed"
            ),
        }
        Ok(bet)
    }

    // -- Queries ----------------------------------------------------------

    pub async fn get_bet(&self, bet_id: &str) -> Result<Bet, BetError> {
        Ok(self.load(bet_id).await?.bet)
    }

    pub async fn bets_for_user(&self, user_id: &str) -> Result<Vec<Bet>, BetError> {
        self.store.list_for_user(user_id).await.map_err(storage_err)
    }

    pub async fn agreement_progress(&self, bet_id: &str) -> Result<AgreementProgress, BetError> {
        Ok(self.get_bet(bet_id).await?.agreement_progress())
    }

    pub async fn obligations_for_bet(&self, bet_id: &str) -> Result<Vec<PaymentObligation>, BetError> {
        // Surface NotFound for unknown bets rather than an empty list.
        self.load(bet_id).await?;
        self.sink.obligations_for_bet(bet_id).await.map_err(storage_err)
    }

    // -- Internals --------------------------------------------------------

    async fn load(&self, bet_id: &str) -> Result<VersionedBet, BetError> {
        self.store
            .load(bet_id)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| BetError::bet_not_found(bet_id))
    }

    /// Optimistic read-modify-write. `apply` must be pure over the bet: it
    /// may run several times against successively fresher copies.
    async fn mutate<T, F>(&self, bet_id: &str, action: BetAction, mut apply: F) -> Result<(Bet, T), BetError>
    where
        F: FnMut(&mut Bet) -> Result<T, BetError>,
    {
        let max_attempts = self.config.max_conflict_retries + 1;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let VersionedBet { mut bet, version } = self.load(bet_id).await?;
            let out = apply(&mut bet)?;

            match self.store.save(&bet, version).await.map_err(storage_err)? {
                SaveOutcome::Saved { version } => {
                    debug!(bet_id, %action, version, attempts, "Transition committed");
                    return Ok((bet, out));
                }
                SaveOutcome::Conflict { current_version: None } => {
                    return Err(BetError::bet_not_found(bet_id));
                }
                SaveOutcome::Conflict { current_version: Some(current) } => {
                    if attempts >= max_attempts {
                        warn!(bet_id, %action, attempts, "Giving up after repeated version conflicts");
                        return Err(BetError::ConcurrencyConflict {
                            bet_id: bet_id.to_string(),
                            attempts,
                        });
                    }
                    debug!(bet_id, %action, expected = version, current, "Version conflict, retrying");
                }
            }
        }
    }

    /// Fan-out for a bet this caller just moved into `resolved`.
    async fn settle(&self, bet: &Bet) -> SettlementReport {
        debug_assert_eq!(bet.status, BetStatus::Resolved);
        let plan = match settlement::plan(bet, Utc::now()) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(bet_id = %bet.id, error = %e, "Could not plan settlement");
                return SettlementReport::default();
            }
        };
        let report = settlement::execute(&plan, self.sink.clone(), &self.config.downstream_retry).await;
        self.outbox.send_all(plan.notifications);
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
