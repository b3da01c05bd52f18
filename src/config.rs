//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the webhook token) are referenced by env-var name in the config
//! and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

use crate::engine::{EngineConfig, FeeSchedule};
use crate::retry::RetryPolicy;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    pub api: ApiConfig,
    /// Overrides the built-in fee tiers when present.
    #[serde(default)]
    pub fees: Option<FeeSchedule>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Required for `sqlite`, e.g. `sqlite://wager.db?mode=rwc`.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Memory backend only: JSON snapshot restored on start, written on shutdown.
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    pub webhook_url_env: Option<String>,
    pub webhook_token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url_env: None,
            webhook_token_env: None,
            timeout_secs: default_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.storage.backend == StorageBackend::Sqlite && self.storage.database_url.is_none() {
            bail!("storage.database_url is required for the sqlite backend");
        }
        if let Some(ref fees) = self.fees {
            if fees.tiers().is_empty() {
                bail!("fees.tiers must not be empty when [fees] is given");
            }
        }
        Ok(())
    }

    /// The fee schedule in effect: configured tiers or the built-in default.
    pub fn fee_schedule(&self) -> FeeSchedule {
        self.fees.clone().unwrap_or_default()
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
