//! Slack incoming-webhook notifier.
//!
//! POSTs `{"text": ...}` to the webhook URL. The URL is a secret and is
//! never logged. A notifier built without a URL fails every send with
//! `DispatchError::NotConfigured` instead of dropping messages silently.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::Notifier;
use crate::types::DispatchError;

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

pub struct SlackNotifier {
    http: Client,
    webhook_url: Option<SecretString>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<SecretString>, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("VOLWATCH/0.1.0")
            .build()
            .context("Failed to build HTTP client for Slack")?;
        Ok(Self { http, webhook_url })
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, text: &str) -> Result<(), DispatchError> {
        let Some(ref url) = self.webhook_url else {
            return Err(DispatchError::NotConfigured);
        };

        let resp = self
            .http
            .post(url.expose_secret().as_str())
            .json(&WebhookPayload { text })
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected { status, body });
        }

        debug!(bytes = text.len(), "Slack message delivered");
        Ok(())
    }
}
