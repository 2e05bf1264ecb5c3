use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use vodforge_db::models::Asset;

use super::{FederationNotifier, OwnerNotifier, PipelineEvent};

/// Posts pipeline events as JSON to a single URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            url: url.to_string(),
        }
    }

    /// Deliver one event.
    pub async fn send(&self, event: &PipelineEvent) -> Result<()> {
        let response = self.client.post(&self.url).json(event).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook delivery failed ({}): {}", status, body);
        }

        Ok(())
    }

    async fn deliver(&self, event: PipelineEvent) {
        if let Err(e) = self.send(&event).await {
            tracing::warn!(url = %self.url, asset_id = ?event.asset_id(), "Failed to notify webhook: {}", e);
        }
    }
}

#[async_trait]
impl FederationNotifier for WebhookNotifier {
    async fn announce(&self, asset: &Asset) {
        self.deliver(PipelineEvent::announced(asset)).await;
    }
}

#[async_trait]
impl OwnerNotifier for WebhookNotifier {
    async fn new_content(&self, asset: &Asset) {
        self.deliver(PipelineEvent::new_content(asset)).await;
    }

    async fn edit_finished(&self, asset: &Asset) {
        self.deliver(PipelineEvent::edit_finished(asset)).await;
    }

    async fn published_after_transcoding(&self, asset: &Asset) {
        self.deliver(PipelineEvent::published_after_transcoding(asset))
            .await;
    }
}
