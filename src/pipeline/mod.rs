//! The assembled control plane.
//!
//! [`Pipeline`] owns one instance of every component and is what job
//! handlers, workers and the CLI talk to. Build it with [`Pipeline::builder`].

mod builder;

pub use builder::PipelineBuilder;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use vodforge_av::Encoder;
use vodforge_common::{AssetId, AssetState, ContainerKind, Error, Result, StorageKind, UserId};
use vodforge_db::models::{Asset, NewAsset, NewRendition};
use vodforge_db::pool::{get_conn, DbPool};
use vodforge_db::queries::{assets, jobs, renditions};
use vodforge_db::transaction::RetryPolicy;

use crate::config::{Config, TranscodingConfig};
use crate::editing::EditingPipeline;
use crate::jobs::{EditPayload, JobPayload, JobQueue, StoryboardPayload, TranscodePayload};
use crate::locks::FileLockManager;
use crate::notifications::{EventBus, NotificationManager};
use crate::publication::{AdvanceContext, AdvanceOutcome, PublicationStateMachine};
use crate::quota::QuotaChecker;
use crate::storage::{
    location_of, purge_scheduled_removals, remove_local, ArtifactKind, ObjectStore, Relocator,
    StorageLayout,
};
use crate::storyboard::StoryboardGenerator;
use crate::transcoding::{content_descriptor, plan_targets, TranscodingOrchestrator};

pub struct Pipeline {
    pub(crate) config: Arc<Config>,
    pub(crate) pool: DbPool,
    pub(crate) retry: RetryPolicy,
    pub(crate) locks: FileLockManager,
    pub(crate) encoder: Arc<dyn Encoder>,
    pub(crate) object_store: Option<Arc<dyn ObjectStore>>,
    pub(crate) events: EventBus,
    pub(crate) quota: Arc<dyn QuotaChecker>,
    pub(crate) queue: JobQueue,
    pub(crate) layout: StorageLayout,
    pub(crate) publication: PublicationStateMachine,
    pub(crate) transcoder: TranscodingOrchestrator,
    pub(crate) editor: EditingPipeline,
    pub(crate) storyboards: StoryboardGenerator,
    pub(crate) relocator: Option<Relocator>,
}

impl Pipeline {
    pub fn builder(config: Config, pool: DbPool, encoder: Arc<dyn Encoder>) -> PipelineBuilder {
        PipelineBuilder::new(config, pool, encoder)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn locks(&self) -> &FileLockManager {
        &self.locks
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn publication(&self) -> &PublicationStateMachine {
        &self.publication
    }

    /// Re-evaluate an asset and move it forward.
    ///
    /// Entering transcoding plans one job per rendition target. An asset
    /// with nothing to transcode from moves straight on.
    pub async fn advance(&self, asset_id: AssetId, ctx: AdvanceContext) -> Result<AdvanceOutcome> {
        let transcoding = &self.config.transcoding;
        let mut ctx = ctx;
        loop {
            let outcome = self
                .publication
                .advance(asset_id, ctx, |conn, asset, ctx| {
                    plan_transcodes(conn, transcoding, asset, ctx)
                })
                .await?;

            match &outcome {
                AdvanceOutcome::ToTranscode { asset, jobs: 0 } => {
                    tracing::warn!(asset_id = %asset.id, "No rendition to transcode from");
                    ctx = AdvanceContext::new(
                        ctx.previous_state.or(Some(AssetState::ToTranscode)),
                        ctx.is_new,
                    );
                }
                _ => return Ok(outcome),
            }
        }
    }

    /// Advance only if the asset is still in `expected`.
    ///
    /// Stage handlers use this so a stage finishing late cannot drag an
    /// asset out of a failure state.
    pub(crate) async fn advance_from(
        &self,
        asset_id: AssetId,
        expected: AssetState,
        ctx: AdvanceContext,
    ) -> Result<Option<AdvanceOutcome>> {
        let current = {
            let conn = get_conn(&self.pool)?;
            assets::get_asset(&conn, asset_id)?.map(|a| a.state)
        };
        match current {
            Some(state) if state == expected => Ok(Some(self.advance(asset_id, ctx).await?)),
            Some(state) => {
                tracing::debug!(asset_id = %asset_id, state = %state, expected = %expected, "Not advancing");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Crash recovery: redeliver interrupted jobs and re-advance every asset
    /// that is mid-pipeline. Returns how many assets were looked at.
    pub async fn recover(&self) -> Result<usize> {
        let (reset, pending) = {
            let conn = get_conn(&self.pool)?;
            let reset = jobs::reset_orphaned_jobs(&conn)?;
            let pending = assets::list_by_states(
                &conn,
                &[
                    AssetState::Editing,
                    AssetState::ToTranscode,
                    AssetState::ToExternalStorage,
                    AssetState::ToFileSystem,
                ],
            )?;
            (reset, pending)
        };
        if reset > 0 {
            tracing::warn!(jobs = reset, "Requeued jobs interrupted by a restart");
            self.queue.wake();
        }

        for asset in &pending {
            if let Err(e) = self.advance(asset.id, AdvanceContext::default()).await {
                tracing::error!(asset_id = %asset.id, "Recovery advance failed: {}", e);
            }
        }
        tracing::info!(assets = pending.len(), "Recovery scan finished");
        Ok(pending.len())
    }

    /// Bring an asset's files back from object storage.
    pub async fn move_to_file_system(&self, asset_id: AssetId) -> Result<Asset> {
        if self.relocator.is_none() {
            return Err(Error::invalid_config("object storage is not configured"));
        }
        self.publication.begin_relocation_to_file_system(asset_id).await
    }

    /// Queue edit tasks for an asset.
    pub async fn request_edit(&self, payload: EditPayload) -> Result<Asset> {
        self.publication.begin_edit(payload).await
    }

    /// Enqueue a job as-is.
    pub async fn register_job(&self, payload: &JobPayload) -> Result<vodforge_db::models::Job> {
        self.queue.register_job(payload).await
    }

    /// Register a new upload and start it down the pipeline.
    ///
    /// The file is copied in as the asset's first web video rendition; the
    /// original stays where it is.
    pub async fn ingest(&self, owner_id: UserId, name: &str, file: &Path) -> Result<AdvanceOutcome> {
        let info = self.encoder.probe(file).await?;
        let resolution = info.resolution();
        let new = match info.duration_secs {
            Some(duration) => NewAsset::new(owner_id, name, AssetState::ToTranscode)
                .with_duration(duration),
            None => NewAsset::new(owner_id, name, AssetState::ToTranscode),
        };

        let dest = self.layout.local_path(
            ArtifactKind::WebVideo,
            new.id,
            &format!("{}-{}.mp4", uuid::Uuid::new_v4(), resolution),
        );
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(file, &dest).await?;

        let rendition = NewRendition {
            asset_id: new.id,
            container: ContainerKind::WebVideo,
            resolution,
            fps: if info.has_video() { info.fps } else { None },
            storage: StorageKind::FileSystem,
            location: location_of(&dest)?,
            playlist_location: None,
            size_bytes: tokio::fs::metadata(&dest).await?.len(),
            descriptor: Some(content_descriptor(&dest).await?),
        };

        let transcoding = &self.config.transcoding;
        let admitted = self
            .publication
            .admit(
                &new,
                |conn, _| renditions::insert_rendition(conn, &rendition).map(|_| ()),
                |conn, asset, ctx| plan_transcodes(conn, transcoding, asset, ctx),
            )
            .await;

        let outcome = match admitted {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(cleanup) = remove_local(&dest).await {
                    tracing::warn!(path = %dest.display(), "Failed to clean up upload: {}", cleanup);
                }
                return Err(e);
            }
        };

        if !self.config.transcoding.enabled && self.config.storyboard.enabled {
            self.queue
                .register_job(&JobPayload::GenerateStoryboard(StoryboardPayload {
                    asset_id: new.id,
                }))
                .await?;
        }
        tracing::info!(asset_id = %new.id, resolution, "Ingested upload");
        Ok(outcome)
    }

    /// Retry file deletions that failed earlier.
    pub async fn purge_removals(&self) -> Result<usize> {
        purge_scheduled_removals(&self.pool, self.object_store.as_ref()).await
    }

    /// Notification fan-out, for callers outside the pipeline.
    pub fn notifications(&self) -> &NotificationManager {
        self.publication.notifications()
    }
}

/// Enqueue one transcode job per target, from the asset's best rendition.
fn plan_transcodes(
    conn: &Connection,
    config: &TranscodingConfig,
    asset: &Asset,
    ctx: AdvanceContext,
) -> Result<u32> {
    let Some(source) = renditions::max_quality(conn, asset.id)? else {
        return Ok(0);
    };

    let targets = plan_targets(config, source.resolution, source.fps);
    for target in &targets {
        JobQueue::register_in(
            conn,
            &JobPayload::Transcode(TranscodePayload {
                asset_id: asset.id,
                target: *target,
                previous_state: ctx.previous_state,
                is_new: ctx.is_new,
            }),
        )?;
    }
    tracing::debug!(asset_id = %asset.id, jobs = targets.len(), "Planned transcodes");
    Ok(targets.len() as u32)
}
