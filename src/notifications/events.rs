//! In-process pipeline events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use vodforge_common::{AssetId, AssetState, JobId, UserId};
use vodforge_db::models::Asset;

use super::{FederationNotifier, OwnerNotifier};

const CHANNEL_CAPACITY: usize = 256;

/// Something observable happened to an asset or a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The asset was (re-)announced to federated peers.
    Announced { asset_id: AssetId, name: String },
    /// A new asset became visible to its audience.
    NewContent {
        asset_id: AssetId,
        owner_id: UserId,
        name: String,
    },
    /// The owner's edit request has been applied and published.
    EditFinished { asset_id: AssetId, owner_id: UserId },
    /// The owner's upload finished transcoding and is now published.
    PublishedAfterTranscoding { asset_id: AssetId, owner_id: UserId },
    /// Persisted state moved.
    StateChanged {
        asset_id: AssetId,
        from: AssetState,
        to: AssetState,
    },
    JobStarted {
        job_id: JobId,
        kind: String,
        asset_id: Option<AssetId>,
    },
    JobCompleted { job_id: JobId, kind: String },
    JobFailed {
        job_id: JobId,
        kind: String,
        error: String,
    },
}

impl PipelineEvent {
    pub fn asset_id(&self) -> Option<AssetId> {
        match self {
            Self::Announced { asset_id, .. }
            | Self::NewContent { asset_id, .. }
            | Self::EditFinished { asset_id, .. }
            | Self::PublishedAfterTranscoding { asset_id, .. }
            | Self::StateChanged { asset_id, .. } => Some(*asset_id),
            Self::JobStarted { asset_id, .. } => *asset_id,
            Self::JobCompleted { .. } | Self::JobFailed { .. } => None,
        }
    }

    pub(crate) fn announced(asset: &Asset) -> Self {
        Self::Announced {
            asset_id: asset.id,
            name: asset.name.clone(),
        }
    }

    pub(crate) fn new_content(asset: &Asset) -> Self {
        Self::NewContent {
            asset_id: asset.id,
            owner_id: asset.owner_id,
            name: asset.name.clone(),
        }
    }

    pub(crate) fn edit_finished(asset: &Asset) -> Self {
        Self::EditFinished {
            asset_id: asset.id,
            owner_id: asset.owner_id,
        }
    }

    pub(crate) fn published_after_transcoding(asset: &Asset) -> Self {
        Self::PublishedAfterTranscoding {
            asset_id: asset.id,
            owner_id: asset.owner_id,
        }
    }
}

/// Broadcast channel of [`PipelineEvent`]s.
///
/// Publishing never blocks and never fails; events sent while nobody is
/// subscribed are dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl FederationNotifier for EventBus {
    async fn announce(&self, asset: &Asset) {
        self.publish(PipelineEvent::announced(asset));
    }
}

#[async_trait]
impl OwnerNotifier for EventBus {
    async fn new_content(&self, asset: &Asset) {
        self.publish(PipelineEvent::new_content(asset));
    }

    async fn edit_finished(&self, asset: &Asset) {
        self.publish(PipelineEvent::edit_finished(asset));
    }

    async fn published_after_transcoding(&self, asset: &Asset) {
        self.publish(PipelineEvent::published_after_transcoding(asset));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vodforge_db::models::NewAsset;

    fn asset() -> Asset {
        let new = NewAsset::new(UserId::new(), "clip", AssetState::Published);
        Asset {
            id: new.id,
            owner_id: new.owner_id,
            name: new.name,
            state: new.state,
            duration_secs: None,
            is_live: false,
            version: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let asset = asset();

        bus.announce(&asset).await;
        bus.edit_finished(&asset).await;

        assert_eq!(rx.recv().await.unwrap(), PipelineEvent::announced(&asset));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.asset_id(), Some(asset.id));
        assert!(matches!(event, PipelineEvent::EditFinished { .. }));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(PipelineEvent::JobCompleted {
            job_id: JobId::new(),
            kind: "transcode".into(),
        });
    }

    #[test]
    fn test_event_json_shape() {
        let id = AssetId::new();
        let json = serde_json::to_value(PipelineEvent::StateChanged {
            asset_id: id,
            from: AssetState::ToTranscode,
            to: AssetState::Published,
        })
        .unwrap();
        assert_eq!(json["event_type"], "state_changed");
        assert_eq!(json["from"], "to-transcode");
        assert_eq!(json["asset_id"], id.to_string());
    }
}
