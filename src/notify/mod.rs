//! Notification gateway.
//!
//! The engine never talks to a push provider directly. Committed
//! transitions drop `Notification`s into an `Outbox` (an unbounded channel,
//! so enqueueing never blocks or fails the transition) and a dispatcher task
//! delivers them through a `Notifier`, retrying failures out of band.

pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;
use crate::types::{Bet, UserId};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    BetCreated,
    BetJoined,
    BetReadyForResolution,
    BetResolved,
    PaymentRequired,
    NeutralPartyAssigned,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::BetCreated => "bet_created",
            NotificationEvent::BetJoined => "bet_joined",
            NotificationEvent::BetReadyForResolution => "bet_ready_for_resolution",
            NotificationEvent::BetResolved => "bet_resolved",
            NotificationEvent::PaymentRequired => "payment_required",
            NotificationEvent::NeutralPartyAssigned => "neutral_party_assigned",
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fire-and-forget message to a set of users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub targets: Vec<UserId>,
    pub payload: Value,
}

impl Notification {
    /// Base payload carries `bet_id`, `title` and `event`.
    pub fn for_bet(event: NotificationEvent, targets: Vec<UserId>, bet: &Bet) -> Self {
        Self {
            event,
            targets,
            payload: json!({
                "bet_id": bet.id,
                "title": bet.title,
                "event": event.as_str(),
            }),
        }
    }

    /// Add an event-specific field to the payload.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(ref mut map) = self.payload {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn bet_id(&self) -> Option<&str> {
        self.payload.get("bet_id").and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Delivery backend (push service, webhook, log).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log. Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        info!(
            event = %notification.event,
            targets = ?notification.targets,
            payload = %notification.payload,
            "Notification"
        );
        Ok(())
    }
}

/// Sending half of the notification queue.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Outbox {
    pub fn channel() -> (Outbox, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox { tx }, rx)
    }

    /// Enqueue without waiting. Notifications with no targets are dropped.
    pub fn send(&self, notification: Notification) {
        if notification.targets.is_empty() {
            return;
        }
        if let Err(e) = self.tx.send(notification) {
            warn!(event = %e.0.event, "Notification outbox closed, dropping");
        }
    }

    pub fn send_all(&self, notifications: impl IntoIterator<Item = Notification>) {
        for n in notifications {
            self.send(n);
        }
    }
}

/// Drain the outbox until every `Outbox` handle is dropped.
pub fn spawn_dispatcher(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            deliver(notifier.as_ref(), &notification, &retry).await;
        }
        debug!("Notification dispatcher stopped");
    })
}

/// Deliver one notification, retrying with backoff. Returns whether it
/// was eventually delivered.
pub async fn deliver(notifier: &dyn Notifier, notification: &Notification, retry: &RetryPolicy) -> bool {
    let result = retry
        .run(|attempt| async move {
            if attempt > 0 {
                debug!(event = %notification.event, attempt, "Retrying notification");
            }
            notifier.notify(notification).await
        })
        .await;

    match result {
        Ok(()) => true,
        Err(e) => {
            error!(
                event = %notification.event,
                bet_id = notification.bet_id().unwrap_or("?"),
                attempts = retry.max_attempts,
                error = %e,
                "Notification delivery failed, dropping"
            );
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
