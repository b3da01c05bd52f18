//! Core engine — bet lifecycle, resolution and settlement.
//!
//! `machine` holds the pure transitions, `service` wraps them in the
//! load → apply → conditional-save loop and triggers settlement fan-out.

pub mod fees;
pub mod ledger;
pub mod machine;
pub mod resolution;
pub mod service;
pub mod settlement;

pub use fees::{facilitation_fee, FeeRule, FeeSchedule, FeeTier};
pub use resolution::{protocol_for, ResolutionProtocol, Verdict};
pub use service::{AgreeOutcome, BetService, EngineConfig, Resolution};
pub use settlement::{SettlementPlan, SettlementReport};
