//! Webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::Notifier;
use crate::config::NotifyConfig;
use crate::feed::Item;
use crate::{FeedhookError, Result};

/// JSON body of a notification: `{"data": item}`.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub data: &'a Item,
}

/// Posts new items to webhooks as JSON.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| FeedhookError::Dispatch(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, webhook_url: &str, item: &Item) -> Result<()> {
        // .json() sets Content-Type: application/json
        let response = self
            .client
            .post(webhook_url)
            .timeout(self.timeout)
            .json(&WebhookPayload { data: item })
            .send()
            .await
            .map_err(|e| FeedhookError::Dispatch(format!("webhook request failed: {e}")))?;

        response
            .error_for_status()
            .map_err(|e| FeedhookError::Dispatch(format!("webhook HTTP error: {e}")))?;

        debug!("Delivered {} to {}", item.link, webhook_url);
        Ok(())
    }
}
