//! Settlement fan-out.
//!
//! Runs once per bet, right after the write that moved it into `resolved`.
//! Every loser owes the full stake to a single payee: the first participant
//! (by join order) on the winning side. Winnings are not split.
//!
//! Obligation ids are derived from `(bet, payer)` so a sink retry after an
//! ambiguous failure cannot create a second request for the same loser.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::notify::{Notification, NotificationEvent};
use crate::retry::RetryPolicy;
use crate::storage::ObligationSink;
use crate::types::{
    Bet, BetAction, BetError, BetStatus, PaymentObligation, PaymentStatus, UserId,
};

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Everything fan-out will emit for one resolved bet.
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub bet_id: String,
    pub winner: String,
    /// `None` when nobody backed the winning side.
    pub payee: Option<UserId>,
    pub obligations: Vec<PaymentObligation>,
    pub notifications: Vec<Notification>,
}

pub fn obligation_id(bet_id: &str, from_user_id: &str) -> String {
    format!("{bet_id}:{from_user_id}")
}

/// Compute obligations and notifications for a resolved bet.
pub fn plan(bet: &Bet, now: DateTime<Utc>) -> Result<SettlementPlan, BetError> {
    let winner = match (bet.status, bet.winner.as_deref()) {
        (BetStatus::Resolved, Some(w)) => w,
        _ => {
            return Err(BetError::illegal(
                bet,
                BetAction::Resolve,
                "settlement requires a resolved bet with a winner",
            ))
        }
    };

    let (_, losers) = bet.partition_by_side(winner);
    let payee = bet.payee().map(|p| p.user_id.clone());

    let mut obligations = Vec::new();
    let mut notifications = Vec::new();

    // Either partition empty means nobody pays.
    if let (Some(to), false) = (payee.as_ref(), losers.is_empty()) {
        for loser in &losers {
            obligations.push(PaymentObligation {
                id: obligation_id(&bet.id, &loser.user_id),
                bet_id: bet.id.clone(),
                from_user_id: loser.user_id.clone(),
                to_user_id: to.clone(),
                amount: bet.amount,
                fee: bet.facilitation_fee,
                status: PaymentStatus::Pending,
                created_at: now,
            });
            notifications.push(
                Notification::for_bet(
                    NotificationEvent::PaymentRequired,
                    vec![loser.user_id.clone()],
                    bet,
                )
                .with("to_user_id", to.clone())
                .with("amount", bet.amount.to_string())
                .with("fee", bet.facilitation_fee.to_string()),
            );
        }
    }

    notifications.push(
        Notification::for_bet(NotificationEvent::BetResolved, bet.participant_ids(), bet)
            .with("winner", winner)
            .with("resolved_by", bet.resolved_by.clone().unwrap_or_default()),
    );

    Ok(SettlementPlan {
        bet_id: bet.id.clone(),
        winner: winner.to_string(),
        payee,
        obligations,
        notifications,
    })
}

// ---------------------------------------------------------------------------
// Execute
// ---------------------------------------------------------------------------

/// What happened when obligations were handed to the sink.
#[derive(Debug, Clone, Default)]
pub struct SettlementReport {
    pub created: Vec<PaymentObligation>,
    /// Rejected on first try; being retried in the background.
    pub deferred: Vec<PaymentObligation>,
}

impl SettlementReport {
    pub fn total_obligations(&self) -> usize {
        self.created.len() + self.deferred.len()
    }
}

/// Hand every planned obligation to the sink. Failures never propagate:
/// the bet is already durably resolved, so rejected obligations are logged
/// and retried in a background task.
pub async fn execute(
    plan: &SettlementPlan,
    sink: Arc<dyn ObligationSink>,
    retry: &RetryPolicy,
) -> SettlementReport {
    let mut report = SettlementReport::default();

    // One request per loser, issued together; results come back in plan order.
    let results = join_all(plan.obligations.iter().map(|ob| sink.create_obligation(ob))).await;

    for (obligation, result) in plan.obligations.iter().zip(results) {
        match result {
            Ok(()) => report.created.push(obligation.clone()),
            Err(e) => {
                warn!(
                    bet_id = %plan.bet_id,
                    from = %obligation.from_user_id,
                    error = %e,
                    "Obligation sink rejected payment request, deferring"
                );
                report.deferred.push(obligation.clone());
            }
        }
    }

    if !report.deferred.is_empty() {
        spawn_retry(report.deferred.clone(), sink, retry.clone());
    }

    info!(
        bet_id = %plan.bet_id,
        winner = %plan.winner,
        payee = ?plan.payee,
        created = report.created.len(),
        deferred = report.deferred.len(),
        "Settlement fan-out complete"
    );

    report
}

fn spawn_retry(pending: Vec<PaymentObligation>, sink: Arc<dyn ObligationSink>, retry: RetryPolicy) {
    tokio::spawn(async move {
        for obligation in pending {
            let result = retry
                .run(|_| {
                    let sink = sink.clone();
                    let obligation = obligation.clone();
                    async move { sink.create_obligation(&obligation).await }
                })
                .await;
            if let Err(e) = result {
                let failure = BetError::DownstreamFailure {
                    target: "obligation_sink".to_string(),
                    message: format!("{e:#}"),
                };
                error!(
                    bet_id = %obligation.bet_id,
                    obligation_id = %obligation.id,
                    error = %failure,
                    "Giving up on payment request"
                );
                record_failed(sink.as_ref(), &obligation).await;
            }
        }
    });
}

/// Leave a `failed` request behind so the missing payment can be found and
/// reissued. An existing id (an ambiguous earlier failure that did land)
/// is left as it is.
async fn record_failed(sink: &dyn ObligationSink, obligation: &PaymentObligation) {
    let failed = PaymentObligation {
        status: PaymentStatus::Failed,
        ..obligation.clone()
    };
    if let Err(e) = sink.create_obligation(&failed).await {
        error!(
            bet_id = %obligation.bet_id,
            obligation_id = %obligation.id,
            error = %format!("{e:#}"),
            "Could not record failed payment request"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
