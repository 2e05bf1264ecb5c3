//! Outbound notifications.
//!
//! Two collaborator roles: federation announces a published asset to peers,
//! and owner notifiers tell users about their content. Both are
//! fire-and-forget; implementations log their own failures.

pub mod events;
pub mod webhook;

pub use events::{EventBus, PipelineEvent};
pub use webhook::WebhookNotifier;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vodforge_db::models::Asset;

use crate::config::Config;

/// Announces published assets to other nodes. Must tolerate repeats.
#[async_trait]
pub trait FederationNotifier: Send + Sync {
    async fn announce(&self, asset: &Asset);
}

/// Tells owners and followers about their content.
#[async_trait]
pub trait OwnerNotifier: Send + Sync {
    async fn new_content(&self, asset: &Asset);

    async fn edit_finished(&self, asset: &Asset);

    async fn published_after_transcoding(&self, asset: &Asset);
}

/// Fans each notification out to every registered target.
#[derive(Clone, Default)]
pub struct NotificationManager {
    federation: Vec<Arc<dyn FederationNotifier>>,
    owners: Vec<Arc<dyn OwnerNotifier>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets described by the configuration: the event bus always, plus a
    /// webhook when one is configured.
    pub fn from_config(config: &Config, events: &EventBus) -> Self {
        let mut manager = Self::new();
        manager.add_federation(Arc::new(events.clone()));
        manager.add_owner(Arc::new(events.clone()));

        if let Some(url) = &config.notifications.webhook_url {
            let webhook = Arc::new(WebhookNotifier::new(
                url,
                Duration::from_secs(config.notifications.timeout_secs),
            ));
            manager.add_federation(webhook.clone());
            manager.add_owner(webhook);
        }

        manager
    }

    pub fn add_federation(&mut self, target: Arc<dyn FederationNotifier>) {
        self.federation.push(target);
    }

    pub fn add_owner(&mut self, target: Arc<dyn OwnerNotifier>) {
        self.owners.push(target);
    }

    pub async fn announce(&self, asset: &Asset) {
        tracing::debug!(asset_id = %asset.id, "Announcing asset");
        for target in &self.federation {
            target.announce(asset).await;
        }
    }

    pub async fn new_content(&self, asset: &Asset) {
        for target in &self.owners {
            target.new_content(asset).await;
        }
    }

    pub async fn edit_finished(&self, asset: &Asset) {
        for target in &self.owners {
            target.edit_finished(asset).await;
        }
    }

    pub async fn published_after_transcoding(&self, asset: &Asset) {
        for target in &self.owners {
            target.published_after_transcoding(asset).await;
        }
    }

    /// Check if there are any notification targets
    pub fn has_targets(&self) -> bool {
        !self.federation.is_empty() || !self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_without_webhook() {
        let manager = NotificationManager::from_config(&Config::default(), &EventBus::new());
        assert!(manager.has_targets());
        assert_eq!(manager.federation.len(), 1);
        assert_eq!(manager.owners.len(), 1);
    }

    #[test]
    fn test_from_config_with_webhook() {
        let mut config = Config::default();
        config.notifications.webhook_url = Some("http://localhost:9/hook".into());
        let manager = NotificationManager::from_config(&config, &EventBus::new());
        assert_eq!(manager.federation.len(), 2);
        assert_eq!(manager.owners.len(), 2);
    }

    #[test]
    fn test_empty_manager_has_no_targets() {
        assert!(!NotificationManager::new().has_targets());
    }
}
