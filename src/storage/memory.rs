//! In-memory backend.
//!
//! Maps behind tokio `RwLock`s. The version check and the write happen under
//! one write lock, which gives the same compare-and-swap guarantee the
//! SQLite backend gets from its conditional `UPDATE`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{BetStore, ObligationSink, SaveOutcome, StoreSnapshot, VersionedBet};
use crate::types::{Bet, PaymentObligation, PaymentStatus};

#[derive(Default)]
pub struct InMemoryStore {
    bets: RwLock<HashMap<String, VersionedBet>>,
    /// Insertion order, for stable listings.
    order: RwLock<Vec<String>>,
    obligations: RwLock<Vec<PaymentObligation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let order = snapshot.bets.iter().map(|vb| vb.bet.id.clone()).collect();
        let bets = snapshot
            .bets
            .into_iter()
            .map(|vb| (vb.bet.id.clone(), vb))
            .collect();
        Self {
            bets: RwLock::new(bets),
            order: RwLock::new(order),
            obligations: RwLock::new(snapshot.obligations),
        }
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let bets = self.bets.read().await;
        let order = self.order.read().await;
        StoreSnapshot {
            bets: order.iter().filter_map(|id| bets.get(id).cloned()).collect(),
            obligations: self.obligations.read().await.clone(),
        }
    }

    pub async fn bet_count(&self) -> usize {
        self.bets.read().await.len()
    }

    pub async fn all_obligations(&self) -> Vec<PaymentObligation> {
        self.obligations.read().await.clone()
    }
}

#[async_trait]
impl BetStore for InMemoryStore {
    async fn insert(&self, bet: &Bet) -> Result<u64> {
        let mut bets = self.bets.write().await;
        if bets.contains_key(&bet.id) {
            bail!("Bet {} already exists", bet.id);
        }
        bets.insert(
            bet.id.clone(),
            VersionedBet {
                bet: bet.clone(),
                version: 1,
            },
        );
        self.order.write().await.push(bet.id.clone());
        Ok(1)
    }

    async fn load(&self, bet_id: &str) -> Result<Option<VersionedBet>> {
        Ok(self.bets.read().await.get(bet_id).cloned())
    }

    async fn save(&self, bet: &Bet, expected_version: u64) -> Result<SaveOutcome> {
        let mut bets = self.bets.write().await;
        match bets.get_mut(&bet.id) {
            Some(stored) if stored.version == expected_version => {
                stored.bet = bet.clone();
                stored.version += 1;
                Ok(SaveOutcome::Saved {
                    version: stored.version,
                })
            }
            Some(stored) => Ok(SaveOutcome::Conflict {
                current_version: Some(stored.version),
            }),
            None => Ok(SaveOutcome::Conflict {
                current_version: None,
            }),
        }
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Bet>> {
        let bets = self.bets.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .filter_map(|id| bets.get(id))
            .map(|vb| &vb.bet)
            .filter(|b| b.is_participant(user_id) || b.is_neutral_party(user_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ObligationSink for InMemoryStore {
    async fn create_obligation(&self, obligation: &PaymentObligation) -> Result<()> {
        let mut obligations = self.obligations.write().await;
        if !obligations.iter().any(|o| o.id == obligation.id) {
            obligations.push(obligation.clone());
        }
        Ok(())
    }

    async fn obligations_for_bet(&self, bet_id: &str) -> Result<Vec<PaymentObligation>> {
        Ok(self
            .obligations
            .read()
            .await
            .iter()
            .filter(|o| o.bet_id == bet_id)
            .cloned()
            .collect())
    }

    async fn set_obligation_status(&self, obligation_id: &str, status: PaymentStatus) -> Result<bool> {
        let mut obligations = self.obligations.write().await;
        match obligations.iter_mut().find(|o| o.id == obligation_id) {
            Some(ob) => {
                ob.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
