use std::sync::Arc;

use vodforge_av::Encoder;
use vodforge_db::pool::DbPool;

use super::Pipeline;
use crate::config::Config;
use crate::editing::EditingPipeline;
use crate::jobs::JobQueue;
use crate::locks::FileLockManager;
use crate::notifications::{EventBus, FederationNotifier, NotificationManager, OwnerNotifier};
use crate::publication::{PublicationSettings, PublicationStateMachine};
use crate::quota::{QuotaChecker, StaticQuota, StoredQuota};
use crate::storage::{DirectoryObjectStore, ObjectStore, Relocator, StorageLayout};
use crate::storyboard::StoryboardGenerator;
use crate::transcoding::TranscodingOrchestrator;

/// Collaborators default to what the configuration describes; tests and
/// embedders can swap any of them.
pub struct PipelineBuilder {
    config: Config,
    pool: DbPool,
    encoder: Arc<dyn Encoder>,
    object_store: Option<Arc<dyn ObjectStore>>,
    quota: Option<Arc<dyn QuotaChecker>>,
    federation: Vec<Arc<dyn FederationNotifier>>,
    owners: Vec<Arc<dyn OwnerNotifier>>,
    events: EventBus,
}

impl PipelineBuilder {
    pub(crate) fn new(config: Config, pool: DbPool, encoder: Arc<dyn Encoder>) -> Self {
        Self {
            config,
            pool,
            encoder,
            object_store: None,
            quota: None,
            federation: Vec::new(),
            owners: Vec::new(),
            events: EventBus::new(),
        }
    }

    /// Use `store` instead of the configured bucket directory.
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn quota(mut self, quota: Arc<dyn QuotaChecker>) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Extra federation target, on top of the configured ones.
    pub fn federation(mut self, target: Arc<dyn FederationNotifier>) -> Self {
        self.federation.push(target);
        self
    }

    /// Extra owner notifier, on top of the configured ones.
    pub fn owner_notifier(mut self, target: Arc<dyn OwnerNotifier>) -> Self {
        self.owners.push(target);
        self
    }

    pub fn build(self) -> Pipeline {
        let Self {
            config,
            pool,
            encoder,
            object_store,
            quota,
            federation,
            owners,
            events,
        } = self;

        let retry = config.retry_policy();
        let layout = StorageLayout::new(config.storage.clone());

        let object_store = match object_store {
            Some(store) => Some(store),
            None => configured_store(&config),
        };
        let quota: Arc<dyn QuotaChecker> = match (quota, config.quota.default_user_bytes) {
            (Some(quota), _) => quota,
            (None, Some(limit)) => Arc::new(StoredQuota::new(pool.clone(), limit)),
            (None, None) => Arc::new(StaticQuota::unlimited()),
        };

        let mut notifications = NotificationManager::from_config(&config, &events);
        for target in federation {
            notifications.add_federation(target);
        }
        for target in owners {
            notifications.add_owner(target);
        }

        let settings = PublicationSettings {
            transcoding_enabled: config.transcoding.enabled,
            object_storage_enabled: config.object_storage.enabled && object_store.is_some(),
        };
        let queue = JobQueue::new(pool.clone(), retry);
        let publication = PublicationStateMachine::new(
            pool.clone(),
            retry,
            settings,
            queue.clone(),
            notifications,
            events.clone(),
        );
        let transcoder = TranscodingOrchestrator::new(
            pool.clone(),
            retry,
            encoder.clone(),
            layout.clone(),
            object_store.clone(),
            config.transcoding.hls_segment_secs,
        );
        let editor = EditingPipeline::new(encoder.clone(), layout.tmp_dir());
        let storyboards = StoryboardGenerator::new(
            pool.clone(),
            retry,
            encoder.clone(),
            layout.clone(),
            object_store.clone(),
            config.storyboard.clone(),
        );
        let relocator = object_store
            .clone()
            .map(|store| Relocator::new(pool.clone(), retry, layout.clone(), store));

        tracing::debug!(
            transcoding = settings.transcoding_enabled,
            object_storage = settings.object_storage_enabled,
            "Pipeline assembled"
        );

        Pipeline {
            config: Arc::new(config),
            pool,
            retry,
            locks: FileLockManager::new(),
            encoder,
            object_store,
            events,
            quota,
            queue,
            layout,
            publication,
            transcoder,
            editor,
            storyboards,
            relocator,
        }
    }
}

fn configured_store(config: &Config) -> Option<Arc<dyn ObjectStore>> {
    if !config.object_storage.enabled {
        return None;
    }
    let dir = config.object_storage.bucket_dir.as_ref()?;
    let store = match &config.object_storage.base_url {
        Some(url) => DirectoryObjectStore::new(dir).with_base_url(url.as_str()),
        None => DirectoryObjectStore::new(dir),
    };
    Some(Arc::new(store))
}
