//! Webhook notifier.
//!
//! Posts each notification as JSON to a push relay. The relay owns device
//! tokens and provider fan-out; this side only needs a URL and an optional
//! bearer token.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::debug;

use super::{Notification, Notifier};

const USER_AGENT: &str = concat!("wager/", env!("CARGO_PKG_VERSION"));

pub struct WebhookNotifier {
    http: Client,
    url: String,
    token: Option<SecretString>,
}

impl WebhookNotifier {
    pub fn new(url: &str, token: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            http,
            url: url.to_string(),
            token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let mut req = self.http.post(&self.url).json(notification);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token.expose_secret());
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Webhook request to {} failed", self.url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Webhook returned {status}: {body}");
        }

        debug!(event = %notification.event, targets = notification.targets.len(), "Webhook delivered");
        Ok(())
    }
}
