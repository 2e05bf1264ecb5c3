//! Persisted job queue.
//!
//! A job is one typed [`JobPayload`] stored in the `jobs` table. Enqueuing
//! also bumps the asset's pending count for the payload's stage, in the same
//! transaction, which is what the publication state machine waits on.

pub mod handlers;
pub mod worker;

pub use worker::{run_next_job, run_until_idle, spawn_workers, JobRun};

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use vodforge_common::{AssetId, AssetState, Error, JobStage, Result};
use vodforge_db::models::Job;
use vodforge_db::pool::DbPool;
use vodforge_db::queries::{assets, job_counts, jobs};
use vodforge_db::transaction::{with_retry, RetryPolicy};

use crate::editing::RawEditTask;
use crate::storage::RelocateDirection;
use crate::transcoding::RenditionTarget;

/// Produce one rendition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodePayload {
    pub asset_id: AssetId,
    pub target: RenditionTarget,
    #[serde(default)]
    pub previous_state: Option<AssetState>,
    #[serde(default)]
    pub is_new: bool,
}

/// Move every file of an asset between storages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocatePayload {
    pub asset_id: AssetId,
    pub direction: RelocateDirection,
    #[serde(default)]
    pub previous_state: Option<AssetState>,
    #[serde(default)]
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryboardPayload {
    pub asset_id: AssetId,
}

/// Apply edit tasks, in order, to the asset's best rendition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditPayload {
    pub asset_id: AssetId,
    pub tasks: Vec<RawEditTask>,
}

/// Everything a worker can be asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobPayload {
    Transcode(TranscodePayload),
    RelocateStorage(RelocatePayload),
    GenerateStoryboard(StoryboardPayload),
    Edit(EditPayload),
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transcode(_) => "transcode",
            Self::RelocateStorage(_) => "relocate-storage",
            Self::GenerateStoryboard(_) => "generate-storyboard",
            Self::Edit(_) => "edit",
        }
    }

    pub fn asset_id(&self) -> AssetId {
        match self {
            Self::Transcode(p) => p.asset_id,
            Self::RelocateStorage(p) => p.asset_id,
            Self::GenerateStoryboard(p) => p.asset_id,
            Self::Edit(p) => p.asset_id,
        }
    }

    /// Stage whose pending count tracks this job, if any.
    pub fn stage(&self) -> Option<JobStage> {
        match self {
            Self::Transcode(_) => Some(JobStage::Transcode),
            Self::RelocateStorage(_) => Some(JobStage::Relocate),
            Self::Edit(_) => Some(JobStage::Edit),
            Self::GenerateStoryboard(_) => None,
        }
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        serde_json::from_value(job.payload.clone()).map_err(|e| {
            Error::invalid_input(format!("job {} has an invalid {} payload: {}", job.id, job.kind, e))
        })
    }

    fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| Error::internal(format!("unserializable job: {e}")))
    }
}

/// Handle to the persisted queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    pool: DbPool,
    retry: RetryPolicy,
    wake: Arc<Notify>,
}

impl JobQueue {
    pub fn new(pool: DbPool, retry: RetryPolicy) -> Self {
        Self {
            pool,
            retry,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Enqueue one job in its own transaction and wake a worker.
    pub async fn register_job(&self, payload: &JobPayload) -> Result<Job> {
        let job = with_retry(&self.pool, &self.retry, |tx| Self::register_in(tx, payload)).await?;
        self.wake();
        Ok(job)
    }

    /// Enqueue inside the caller's transaction.
    ///
    /// Workers are not woken; call [`JobQueue::wake`] after commit. A job for
    /// an asset that no longer exists is still queued, without a pending
    /// count; its handler finds the asset gone and completes.
    pub fn register_in(conn: &Connection, payload: &JobPayload) -> Result<Job> {
        let asset_id = payload.asset_id();
        if let Some(stage) = payload.stage() {
            if assets::exists(conn, asset_id)? {
                job_counts::increment(conn, asset_id, stage, 1)?;
            } else {
                tracing::debug!(asset_id = %asset_id, kind = payload.kind(), "Asset is gone, not counting job");
            }
        }
        let job = jobs::create_job(conn, payload.kind(), Some(asset_id), &payload.to_value()?)?;
        tracing::debug!(job_id = %job.id, kind = payload.kind(), asset_id = %asset_id, "Enqueued job");
        Ok(job)
    }

    /// Let an idle worker look for work now.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Sleep until woken or `poll` elapses.
    pub(crate) async fn idle(&self, poll: Duration) {
        let _ = tokio::time::timeout(poll, self.wake.notified()).await;
    }
}
