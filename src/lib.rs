//! WAGER — peer-to-peer bet lifecycle and resolution engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod retry;
pub mod engine;
pub mod storage;
pub mod notify;
pub mod api;
