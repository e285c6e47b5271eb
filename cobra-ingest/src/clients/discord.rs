//! Notification sinks

use super::{NotificationSink, SourceError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

/// Discord incoming webhook
pub struct DiscordWebhookSink {
    client: Client,
    webhook_url: String,
}

impl DiscordWebhookSink {
    pub fn new(client: Client, webhook_url: String) -> Self {
        Self {
            client,
            webhook_url,
        }
    }
}

#[async_trait]
impl NotificationSink for DiscordWebhookSink {
    async fn send(&self, message: &str) -> Result<(), SourceError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "content": message }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status, "discord webhook"));
        }
        Ok(())
    }
}

/// Writes notifications to the log when no webhook is configured
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, message: &str) -> Result<(), SourceError> {
        info!(target: "cobra_ingest::notify", "{}", message);
        Ok(())
    }
}
