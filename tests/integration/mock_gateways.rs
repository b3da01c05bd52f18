//! Test doubles for the engine's outbound gateways.
//!
//! `FlakySink` wraps the in-memory obligation store and can be told to fail
//! every call, to simulate a payments backend outage. `RecordingNotifier`
//! keeps every delivered notification for later inspection.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

use wager::engine::{BetService, EngineConfig, FeeSchedule};
use wager::notify::{Notification, NotificationEvent, Notifier, Outbox};
use wager::retry::RetryPolicy;
use wager::storage::{InMemoryStore, ObligationSink};
use wager::types::{NewBet, PaymentObligation, PaymentStatus, ResolutionType};

// ---------------------------------------------------------------------------
// Obligation sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FlakySink {
    inner: InMemoryStore,
    /// If set, every call returns this error.
    force_error: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FlakySink {
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.force_error.lock().unwrap().as_ref() {
            Some(err) => Err(anyhow!("{err}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObligationSink for FlakySink {
    async fn create_obligation(&self, obligation: &PaymentObligation) -> Result<()> {
        self.check()?;
        self.inner.create_obligation(obligation).await
    }

    async fn obligations_for_bet(&self, bet_id: &str) -> Result<Vec<PaymentObligation>> {
        self.inner.obligations_for_bet(bet_id).await
    }

    async fn set_obligation_status(&self, obligation_id: &str, status: PaymentStatus) -> Result<bool> {
        self.check()?;
        self.inner.set_obligation_status(obligation_id, status).await
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.received.lock().unwrap().iter().map(|n| n.event).collect()
    }

    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.received.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub service: Arc<BetService>,
    pub store: Arc<InMemoryStore>,
    pub sink: Arc<FlakySink>,
    pub rx: UnboundedReceiver<Notification>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_conflict_retries(5)
    }

    pub fn with_conflict_retries(max_conflict_retries: u32) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(FlakySink::default());
        let (outbox, rx) = Outbox::channel();
        let config = EngineConfig {
            max_conflict_retries,
            downstream_retry: RetryPolicy::new(5, 5, 20),
        };
        let service = BetService::new(
            store.clone(),
            sink.clone(),
            outbox,
            FeeSchedule::default(),
            config,
        );
        Self {
            service: Arc::new(service),
            store,
            sink,
            rx,
        }
    }

    /// Everything enqueued so far.
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.rx.try_recv() {
            out.push(n);
        }
        out
    }
}

pub fn new_bet(kind: ResolutionType, amount: Decimal, sides: &[&str]) -> NewBet {
    NewBet {
        title: format!("Test bet {}", Utc::now().timestamp_micros()),
        description: "integration".to_string(),
        amount,
        sides: sides.iter().map(|s| s.to_string()).collect(),
        resolution_type: kind,
        neutral_party: match kind {
            ResolutionType::NeutralParty => Some("judge".to_string()),
            ResolutionType::EveryoneAgrees => None,
        },
        creator_id: "alice".to_string(),
        creator_display_name: "Alice".to_string(),
    }
}
