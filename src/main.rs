//! WAGER — peer-to-peer bet lifecycle service
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the configured store, starts the notification dispatcher and serves the
//! HTTP API until Ctrl-C.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use wager::api;
use wager::config::{self, StorageBackend};
use wager::engine::BetService;
use wager::notify::{self, webhook::WebhookNotifier, LogNotifier, Notifier, Outbox};
use wager::storage::{self, BetStore, InMemoryStore, ObligationSink, SqliteStore};

/// How long shutdown waits for queued notifications to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    info!(
        backend = ?cfg.storage.backend,
        api_port = cfg.api.port,
        max_conflict_retries = cfg.engine.max_conflict_retries,
        "WAGER starting up"
    );

    // -- Storage ----------------------------------------------------------

    // Kept separately so the memory backend can be snapshotted on shutdown.
    let mut memory: Option<Arc<InMemoryStore>> = None;

    let (store, sink): (Arc<dyn BetStore>, Arc<dyn ObligationSink>) = match cfg.storage.backend {
        StorageBackend::Memory => {
            let restored = match cfg.storage.snapshot_path.as_deref() {
                Some(path) => storage::load_snapshot(path)?,
                None => None,
            };
            let mem = Arc::new(restored.map(InMemoryStore::from_snapshot).unwrap_or_default());
            memory = Some(mem.clone());
            (mem.clone() as Arc<dyn BetStore>, mem as Arc<dyn ObligationSink>)
        }
        StorageBackend::Sqlite => {
            let url = cfg
                .storage
                .database_url
                .as_deref()
                .context("storage.database_url is required for the sqlite backend")?;
            let db = Arc::new(SqliteStore::connect(url, cfg.storage.max_connections).await?);
            (db.clone() as Arc<dyn BetStore>, db as Arc<dyn ObligationSink>)
        }
    };

    // -- Notifications ----------------------------------------------------

    let notifier = build_notifier(&cfg.notifications)?;
    let (outbox, rx) = Outbox::channel();
    let dispatcher = notify::spawn_dispatcher(rx, notifier, cfg.notifications.retry.clone());

    // -- Service ----------------------------------------------------------

    let service = Arc::new(BetService::new(
        store,
        sink,
        outbox,
        cfg.fee_schedule(),
        cfg.engine.clone(),
    ));

    if cfg.api.enabled {
        api::serve(service.clone(), cfg.api.port, shutdown_signal()).await?;
    } else {
        warn!("API disabled in config; idling until Ctrl-C");
        shutdown_signal().await;
    }

    // -- Shutdown ---------------------------------------------------------

    info!("Shutting down");

    // Dropping the last service handle closes the outbox, which lets the
    // dispatcher finish what is queued and exit.
    drop(service);
    if tokio::time::timeout(DRAIN_TIMEOUT, dispatcher).await.is_err() {
        warn!("Notification queue did not drain in time");
    }

    if let (Some(mem), Some(path)) = (memory, cfg.storage.snapshot_path.as_deref()) {
        if let Err(e) = storage::save_snapshot(&mem.snapshot().await, path) {
            error!(error = %e, "Failed to save snapshot on shutdown");
        }
    }

    info!("WAGER stopped");
    Ok(())
}

/// Webhook delivery when configured, otherwise log-only.
fn build_notifier(cfg: &config::NotificationsConfig) -> Result<Arc<dyn Notifier>> {
    let url = match cfg.webhook_url_env.as_deref() {
        Some(env) => match config::AppConfig::resolve_env(env) {
            Ok(url) if !url.trim().is_empty() => url,
            Ok(_) => {
                info!(env, "Webhook URL is empty, logging notifications");
                return Ok(Arc::new(LogNotifier));
            }
            Err(e) => {
                warn!(error = %e, "Webhook URL not available, logging notifications instead");
                return Ok(Arc::new(LogNotifier));
            }
        },
        None => {
            info!("No webhook configured, logging notifications");
            return Ok(Arc::new(LogNotifier));
        }
    };

    let token = cfg
        .webhook_token_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok())
        .map(SecretString::new);

    let webhook = WebhookNotifier::new(&url, token, Duration::from_secs(cfg.timeout_secs))?;
    info!(url = webhook.url(), "Delivering notifications via webhook");
    Ok(Arc::new(webhook))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wager=info"));

    let json_logging = std::env::var("WAGER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
