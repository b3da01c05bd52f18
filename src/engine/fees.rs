//! Facilitation fee calculator.
//!
//! A tiered schedule maps a stake amount to the platform's facilitation
//! fee. The fee is computed once when a bet is created and stored on it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How a tier turns an amount into a fee.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeRule {
    /// Fixed fee regardless of amount.
    Flat(Decimal),
    /// `ceil(amount * rate)`.
    Percent(Decimal),
}

/// A bracket starting at `min_amount` (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeTier {
    pub min_amount: Decimal,
    pub rule: FeeRule,
}

/// Ordered fee brackets. Amounts below the first bracket are free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFeeSchedule")]
pub struct FeeSchedule {
    tiers: Vec<FeeTier>,
}

#[derive(Deserialize)]
struct RawFeeSchedule {
    tiers: Vec<FeeTier>,
}

impl From<RawFeeSchedule> for FeeSchedule {
    fn from(raw: RawFeeSchedule) -> Self {
        Self::new(raw.tiers)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::new(vec![
            FeeTier { min_amount: dec!(20), rule: FeeRule::Flat(dec!(1)) },
            FeeTier { min_amount: dec!(100), rule: FeeRule::Percent(dec!(0.02)) },
            FeeTier { min_amount: dec!(500), rule: FeeRule::Percent(dec!(0.015)) },
            FeeTier { min_amount: dec!(1000), rule: FeeRule::Percent(dec!(0.01)) },
        ])
    }
}

impl FeeSchedule {
    /// Build a schedule; tiers are sorted by `min_amount`.
    pub fn new(mut tiers: Vec<FeeTier>) -> Self {
        tiers.sort_by(|a, b| a.min_amount.cmp(&b.min_amount));
        Self { tiers }
    }

    pub fn tiers(&self) -> &[FeeTier] {
        &self.tiers
    }

    /// Fee for a stake of `amount`.
    pub fn fee(&self, amount: Decimal) -> Decimal {
        let tier = self.tiers.iter().rev().find(|t| amount >= t.min_amount);
        match tier {
            None => Decimal::ZERO,
            Some(FeeTier { rule: FeeRule::Flat(fee), .. }) => *fee,
            Some(FeeTier { rule: FeeRule::Percent(rate), .. }) => (amount * rate).ceil(),
        }
    }
}

/// Fee under the standard schedule.
pub fn facilitation_fee(amount: Decimal) -> Decimal {
    FeeSchedule::default().fee(amount)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
