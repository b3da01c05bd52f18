//! SQLite backend.
//!
//! Bets are stored as JSON documents keyed by id with an integer version
//! column. `save` is a single conditional `UPDATE ... WHERE version = ?`, so
//! two writers holding the same version cannot both succeed. A membership
//! table indexes bets by participant and neutral party for `list_for_user`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::{BetStore, ObligationSink, SaveOutcome, VersionedBet};
use crate::types::{Bet, PaymentObligation, PaymentStatus};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS bets (
        id          TEXT PRIMARY KEY,
        version     INTEGER NOT NULL,
        status      TEXT NOT NULL,
        body        TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bet_members (
        bet_id   TEXT NOT NULL,
        user_id  TEXT NOT NULL,
        PRIMARY KEY (bet_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payment_requests (
        id            TEXT PRIMARY KEY,
        bet_id        TEXT NOT NULL,
        from_user_id  TEXT NOT NULL,
        to_user_id    TEXT NOT NULL,
        status        TEXT NOT NULL,
        body          TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_payment_requests_bet ON payment_requests (bet_id)",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create tables if needed.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to open SQLite database: {database_url}"))?;
        let store = Self { pool };
        store.migrate().await?;
        info!(database_url, "SQLite store ready");
        Ok(store)
    }

    /// A private in-memory database. One connection, since each SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn migrate(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("Failed to apply SQLite schema")?;
        }
        Ok(())
    }

    fn members(bet: &Bet) -> Vec<&str> {
        let mut ids: Vec<&str> = bet.participants.iter().map(|p| p.user_id.as_str()).collect();
        if let Some(ref np) = bet.neutral_party {
            ids.push(np);
        }
        ids
    }
}

#[async_trait]
impl BetStore for SqliteStore {
    async fn insert(&self, bet: &Bet) -> Result<u64> {
        let body = serde_json::to_string(bet).context("Failed to serialise bet")?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO bets (id, version, status, body, updated_at) VALUES (?, 1, ?, ?, ?)")
            .bind(&bet.id)
            .bind(bet.status.as_str())
            .bind(&body)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert bet {}", bet.id))?;

        for user_id in Self::members(bet) {
            sqlx::query("INSERT OR IGNORE INTO bet_members (bet_id, user_id) VALUES (?, ?)")
                .bind(&bet.id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(1)
    }

    async fn load(&self, bet_id: &str) -> Result<Option<VersionedBet>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT body, version FROM bets WHERE id = ?")
                .bind(bet_id)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to load bet {bet_id}"))?;

        match row {
            None => Ok(None),
            Some((body, version)) => {
                let bet: Bet = serde_json::from_str(&body)
                    .with_context(|| format!("Corrupt bet document {bet_id}"))?;
                Ok(Some(VersionedBet {
                    bet,
                    version: version as u64,
                }))
            }
        }
    }

    async fn save(&self, bet: &Bet, expected_version: u64) -> Result<SaveOutcome> {
        let body = serde_json::to_string(bet).context("Failed to serialise bet")?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE bets
               SET version = version + 1, status = ?, body = ?, updated_at = ?
             WHERE id = ? AND version = ?
            "#,
        )
        .bind(bet.status.as_str())
        .bind(&body)
        .bind(Utc::now().to_rfc3339())
        .bind(&bet.id)
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to save bet {}", bet.id))?
        .rows_affected();

        if updated == 0 {
            let current: Option<i64> = sqlx::query_scalar("SELECT version FROM bets WHERE id = ?")
                .bind(&bet.id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            debug!(bet_id = %bet.id, expected_version, ?current, "Version check failed");
            return Ok(SaveOutcome::Conflict {
                current_version: current.map(|v| v as u64),
            });
        }

        for user_id in Self::members(bet) {
            sqlx::query("INSERT OR IGNORE INTO bet_members (bet_id, user_id) VALUES (?, ?)")
                .bind(&bet.id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(SaveOutcome::Saved {
            version: expected_version + 1,
        })
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Bet>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT b.body
              FROM bets b
              JOIN bet_members m ON m.bet_id = b.id
             WHERE m.user_id = ?
             ORDER BY b.rowid
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list bets for {user_id}"))?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).context("Corrupt bet document"))
            .collect()
    }
}

#[async_trait]
impl ObligationSink for SqliteStore {
    async fn create_obligation(&self, obligation: &PaymentObligation) -> Result<()> {
        let body = serde_json::to_string(obligation).context("Failed to serialise obligation")?;
        let status = status_label(obligation.status)?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO payment_requests (id, bet_id, from_user_id, to_user_id, status, body)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&obligation.id)
        .bind(&obligation.bet_id)
        .bind(&obligation.from_user_id)
        .bind(&obligation.to_user_id)
        .bind(status)
        .bind(body)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create payment request {}", obligation.id))?;
        Ok(())
    }

    async fn obligations_for_bet(&self, bet_id: &str) -> Result<Vec<PaymentObligation>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT body FROM payment_requests WHERE bet_id = ? ORDER BY rowid")
                .bind(bet_id)
                .fetch_all(&self.pool)
                .await
                .with_context(|| format!("Failed to list payment requests for {bet_id}"))?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).context("Corrupt payment request"))
            .collect()
    }

    async fn set_obligation_status(&self, obligation_id: &str, status: PaymentStatus) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let body: Option<String> = sqlx::query_scalar("SELECT body FROM payment_requests WHERE id = ?")
            .bind(obligation_id)
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| format!("Failed to load payment request {obligation_id}"))?;
        let Some(body) = body else {
            tx.rollback().await?;
            return Ok(false);
        };

        let mut obligation: PaymentObligation =
            serde_json::from_str(&body).context("Corrupt payment request")?;
        obligation.status = status;

        sqlx::query("UPDATE payment_requests SET status = ?, body = ? WHERE id = ?")
            .bind(status_label(status)?)
            .bind(serde_json::to_string(&obligation).context("Failed to serialise obligation")?)
            .bind(obligation_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to update payment request {obligation_id}"))?;

        tx.commit().await?;
        Ok(true)
    }
}

/// The snake_case name stored in the `status` column.
fn status_label(status: PaymentStatus) -> Result<String> {
    match serde_json::to_value(status)? {
        serde_json::Value::String(label) => Ok(label),
        other => anyhow::bail!("Unexpected payment status encoding: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
