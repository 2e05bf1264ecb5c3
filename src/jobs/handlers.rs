//! One handler per job kind.
//!
//! Every handler takes the asset's lock, reloads the asset, and quietly
//! succeeds if it is gone. Stage handlers then settle the stage's pending
//! count whether or not the work succeeded, and either advance the asset or
//! record the failure on it.

use vodforge_common::{
    AssetId, AssetState, ContainerKind, Error, FailureKind, JobStage, Result, StorageKind,
};
use vodforge_db::models::{Asset, Rendition};
use vodforge_db::pool::get_conn;
use vodforge_db::queries::{assets, job_counts, renditions};
use vodforge_db::transaction::with_retry;

use super::{
    EditPayload, JobPayload, JobQueue, RelocatePayload, StoryboardPayload, TranscodePayload,
};
use crate::editing::parse_tasks;
use crate::locks::AssetLock;
use crate::pipeline::Pipeline;
use crate::publication::AdvanceContext;
use crate::quota::verify_headroom;
use crate::storage::{
    execute_removals, location_of, materialize, removals, ArtifactKind, RelocateDirection,
    ScheduledRemoval, MASTER_PLAYLIST,
};

pub(crate) async fn dispatch(pipeline: &Pipeline, payload: JobPayload) -> Result<()> {
    match payload {
        JobPayload::Transcode(p) => transcode(pipeline, p).await,
        JobPayload::RelocateStorage(p) => relocate(pipeline, p).await,
        JobPayload::GenerateStoryboard(p) => storyboard(pipeline, p).await,
        JobPayload::Edit(p) => edit(pipeline, p).await,
    }
}

/// Take the lock, then look the asset up. `None` if it was deleted.
async fn lock_and_load(pipeline: &Pipeline, asset_id: AssetId) -> Result<Option<(AssetLock, Asset)>> {
    let lock = pipeline.locks.acquire(asset_id).await;
    let asset = {
        let conn = get_conn(&pipeline.pool)?;
        assets::get_asset(&conn, asset_id)?
    };
    match asset {
        Some(asset) => Ok(Some((lock, asset))),
        None => {
            tracing::info!(asset_id = %asset_id, "Asset is gone, nothing to do");
            Ok(None)
        }
    }
}

fn best_rendition(pipeline: &Pipeline, asset_id: AssetId) -> Result<Option<Rendition>> {
    let conn = get_conn(&pipeline.pool)?;
    renditions::max_quality(&conn, asset_id)
}

/// One job of `stage` is done. Returns how many are left.
async fn settle(pipeline: &Pipeline, asset_id: AssetId, stage: JobStage) -> Result<u32> {
    with_retry(&pipeline.pool, &pipeline.retry, |tx| {
        job_counts::decrement(tx, asset_id, stage)
    })
    .await
}

/// What a stage's work left behind.
enum Worked {
    Missing,
    Done,
}

/// Settle the stage's pending count and, on error, record `failure` on the
/// asset. Yields the jobs still pending, or `None` when the asset is gone.
async fn conclude(
    pipeline: &Pipeline,
    asset_id: AssetId,
    stage: JobStage,
    failure: FailureKind,
    worked: Result<Worked>,
) -> Result<Option<u32>> {
    match worked {
        Ok(Worked::Missing) => Ok(None),
        Ok(Worked::Done) => settle(pipeline, asset_id, stage).await.map(Some),
        Err(e) => {
            if let Err(settle_err) = settle(pipeline, asset_id, stage).await {
                tracing::error!(asset_id = %asset_id, stage = %stage, "Could not settle pending count: {}", settle_err);
            }
            pipeline.publication.move_to_failed(asset_id, failure).await;
            Err(e)
        }
    }
}

async fn transcode(pipeline: &Pipeline, payload: TranscodePayload) -> Result<()> {
    let asset_id = payload.asset_id;
    let worked: Result<Worked> = async {
        let Some((lock, asset)) = lock_and_load(pipeline, asset_id).await? else {
            return Ok(Worked::Missing);
        };
        let source = best_rendition(pipeline, asset_id)?
            .ok_or_else(|| Error::not_found(format!("no rendition of {asset_id} to transcode")))?;
        let local =
            materialize(&source, pipeline.object_store.as_ref(), &pipeline.layout.tmp_dir())
                .await?;
        pipeline
            .transcoder
            .produce_rendition(&lock, &asset, local.path(), &payload.target)
            .await?;
        Ok(Worked::Done)
    }
    .await;

    let concluded = conclude(
        pipeline,
        asset_id,
        JobStage::Transcode,
        FailureKind::Transcoding,
        worked,
    )
    .await?;
    let Some(remaining) = concluded else {
        return Ok(());
    };
    if remaining > 0 {
        tracing::debug!(asset_id = %asset_id, remaining, "Waiting for other renditions");
        return Ok(());
    }
    if pipeline.config.storyboard.enabled {
        queue_storyboard_if_transcoding(pipeline, asset_id).await?;
    }
    let ctx = AdvanceContext::new(payload.previous_state, payload.is_new);
    pipeline
        .advance_from(asset_id, AssetState::ToTranscode, ctx)
        .await?;
    Ok(())
}

/// Queue the storyboard ahead of whatever `advance` plans next, unless an
/// earlier job already failed the asset.
async fn queue_storyboard_if_transcoding(pipeline: &Pipeline, asset_id: AssetId) -> Result<()> {
    let queued = with_retry(&pipeline.pool, &pipeline.retry, |tx| {
        match assets::get_asset(tx, asset_id)? {
            Some(asset) if asset.state == AssetState::ToTranscode => {
                let payload = JobPayload::GenerateStoryboard(StoryboardPayload { asset_id });
                JobQueue::register_in(tx, &payload).map(|_| true)
            }
            _ => Ok(false),
        }
    })
    .await?;
    if queued {
        pipeline.queue.wake();
    } else {
        tracing::debug!(asset_id = %asset_id, "Asset left transcoding, no storyboard");
    }
    Ok(())
}

async fn relocate(pipeline: &Pipeline, payload: RelocatePayload) -> Result<()> {
    let asset_id = payload.asset_id;
    let direction = payload.direction;
    let worked: Result<Worked> = async {
        let relocator = pipeline
            .relocator
            .as_ref()
            .ok_or_else(|| Error::invalid_config("object storage is not configured"))?;
        let Some((lock, asset)) = lock_and_load(pipeline, asset_id).await? else {
            return Ok(Worked::Missing);
        };
        relocator.relocate(&lock, &asset, direction).await?;
        Ok(Worked::Done)
    }
    .await;

    let concluded = conclude(
        pipeline,
        asset_id,
        JobStage::Relocate,
        direction.failure(),
        worked,
    )
    .await?;
    if concluded == Some(0) {
        let expected = match direction {
            RelocateDirection::ToExternal => AssetState::ToExternalStorage,
            RelocateDirection::ToFileSystem => AssetState::ToFileSystem,
        };
        let ctx = AdvanceContext::new(payload.previous_state, payload.is_new);
        pipeline.advance_from(asset_id, expected, ctx).await?;
    }
    Ok(())
}

async fn storyboard(pipeline: &Pipeline, payload: StoryboardPayload) -> Result<()> {
    let Some((lock, asset)) = lock_and_load(pipeline, payload.asset_id).await? else {
        return Ok(());
    };
    let Some(source) = best_rendition(pipeline, asset.id)? else {
        tracing::debug!(asset_id = %asset.id, "No rendition, skipping storyboard");
        return Ok(());
    };
    let local =
        materialize(&source, pipeline.object_store.as_ref(), &pipeline.layout.tmp_dir()).await?;
    pipeline
        .storyboards
        .generate(&lock, &asset, local.path())
        .await?;
    Ok(())
}

async fn edit(pipeline: &Pipeline, payload: EditPayload) -> Result<()> {
    let asset_id = payload.asset_id;
    let worked: Result<Worked> = async {
        let tasks = parse_tasks(&payload.tasks)?;
        let Some((lock, asset)) = lock_and_load(pipeline, asset_id).await? else {
            return Ok(Worked::Missing);
        };
        let source = best_rendition(pipeline, asset_id)?
            .ok_or_else(|| Error::not_found(format!("no rendition of {asset_id} to edit")))?;

        let mut additional_bytes = source.size_bytes;
        for file in tasks.iter().filter_map(|t| t.appended_file()) {
            additional_bytes += tokio::fs::metadata(file).await?.len();
        }
        let quota =
            verify_headroom(pipeline.quota.as_ref(), asset.owner_id, additional_bytes).await?;

        let local =
            materialize(&source, pipeline.object_store.as_ref(), &pipeline.layout.tmp_dir())
                .await?;
        let edited = pipeline
            .editor
            .run(asset_id, local.path(), &tasks, quota)
            .await?;
        let duration = pipeline.encoder.probe(edited.path()).await?.duration_secs;
        let kept = pipeline
            .transcoder
            .adopt_file(&lock, &asset, edited.path(), ContainerKind::WebVideo)
            .await?;
        drop(edited);
        drop(local);

        let scheduled = drop_other_renditions(pipeline, &asset, &kept, duration).await?;
        execute_removals(&pipeline.pool, pipeline.object_store.as_ref(), &scheduled).await;
        tracing::info!(asset_id = %asset_id, rendition_id = %kept.id, "Edit applied");
        Ok(Worked::Done)
    }
    .await;

    let concluded = conclude(
        pipeline,
        asset_id,
        JobStage::Edit,
        FailureKind::Transcoding,
        worked,
    )
    .await?;
    if concluded == Some(0) {
        let ctx = AdvanceContext::new(Some(AssetState::Editing), false);
        pipeline
            .advance_from(asset_id, AssetState::Editing, ctx)
            .await?;
    }
    Ok(())
}

/// After an edit only the edited rendition is current; the rest describe the
/// old video.
async fn drop_other_renditions(
    pipeline: &Pipeline,
    asset: &Asset,
    kept: &Rendition,
    duration: Option<f64>,
) -> Result<Vec<ScheduledRemoval>> {
    let layout = &pipeline.layout;
    with_retry(&pipeline.pool, &pipeline.retry, |tx| {
        let mut scheduled = Vec::new();
        let mut hls_storage = None;
        for old in renditions::list_for_asset(tx, asset.id)? {
            if old.id == kept.id {
                continue;
            }
            renditions::delete_rendition(tx, old.id)?;
            scheduled.push(removals::schedule(tx, asset.id, old.storage, &old.location)?);
            if let Some(playlist) = &old.playlist_location {
                scheduled.push(removals::schedule(tx, asset.id, old.storage, playlist)?);
            }
            if old.container == ContainerKind::Hls {
                hls_storage = Some(old.storage);
            }
        }

        if let Some(storage) = hls_storage {
            let master = match storage {
                StorageKind::FileSystem => location_of(&layout.master_playlist(asset.id))?,
                StorageKind::ObjectStorage => {
                    layout.object_key(ArtifactKind::Hls, asset.id, MASTER_PLAYLIST)
                }
            };
            scheduled.push(removals::schedule(tx, asset.id, storage, &master)?);
        }
        if let Some(duration) = duration {
            assets::set_duration(tx, asset.id, duration)?;
        }
        Ok(scheduled)
    })
    .await
}
