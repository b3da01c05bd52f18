//! Persistence gateway.
//!
//! Defines the `BetStore` and `ObligationSink` traits the engine writes
//! through, and provides two backends:
//! - `memory`: process-local maps with version checks, optionally
//!   snapshotted to a JSON file between runs
//! - `sqlite`: durable storage via sqlx
//!
//! `BetStore::save` is a compare-and-swap on the bet's version. That is the
//! only concurrency control the engine relies on.

pub mod memory;
pub mod sqlite;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::types::{Bet, PaymentObligation, PaymentStatus};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// A bet together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedBet {
    pub bet: Bet,
    pub version: u64,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { version: u64 },
    /// Someone else wrote first (or the bet vanished).
    Conflict { current_version: Option<u64> },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BetStore: Send + Sync {
    /// Store a new bet at version 1. Fails if the id already exists.
    async fn insert(&self, bet: &Bet) -> Result<u64>;

    async fn load(&self, bet_id: &str) -> Result<Option<VersionedBet>>;

    /// Write `bet` only if the stored version is still `expected_version`.
    async fn save(&self, bet: &Bet, expected_version: u64) -> Result<SaveOutcome>;

    /// Bets where the user is a participant or the neutral party, oldest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Bet>>;
}

/// Where settlement sends payment requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObligationSink: Send + Sync {
    /// Record a payment request. Re-sending an existing id is a no-op.
    async fn create_obligation(&self, obligation: &PaymentObligation) -> Result<()>;

    async fn obligations_for_bet(&self, bet_id: &str) -> Result<Vec<PaymentObligation>>;

    /// Move an existing request to `status`. Returns false for an unknown id.
    async fn set_obligation_status(&self, obligation_id: &str, status: PaymentStatus) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Snapshots (memory backend)
// ---------------------------------------------------------------------------

/// Everything an in-memory store holds, for persistence between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub bets: Vec<VersionedBet>,
    pub obligations: Vec<PaymentObligation>,
}

/// Save a snapshot to a JSON file.
pub fn save_snapshot(snapshot: &StoreSnapshot, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)
        .context("Failed to serialise store snapshot")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write snapshot to {path}"))?;

    debug!(path, bets = snapshot.bets.len(), "Snapshot saved");
    Ok(())
}

/// Load a snapshot from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_snapshot(path: &str) -> Result<Option<StoreSnapshot>> {
    if !Path::new(path).exists() {
        info!(path, "No snapshot found, starting empty");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read snapshot from {path}"))?;

    let snapshot: StoreSnapshot = serde_json::from_str(&json)
        .context(format!("Failed to parse snapshot from {path}"))?;

    info!(
        path,
        bets = snapshot.bets.len(),
        obligations = snapshot.obligations.len(),
        "Snapshot loaded from disk"
    );

    Ok(Some(snapshot))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
