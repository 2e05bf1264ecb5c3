//! Publication state machine.
//!
//! Decides what an asset needs next and moves it there. Every transition is a
//! compare-and-swap on the asset's version inside [`with_retry`], and the
//! work that belongs to the new state (transcoding jobs, a relocation job) is
//! enqueued in that same transaction. Notifications go out after commit.
//!
//! Waiting is decided from persisted pending-job counts, never from the job
//! queue, so re-running [`PublicationStateMachine::advance`] after a crash is
//! always safe.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use vodforge_common::{AssetId, AssetState, Error, FailureKind, JobStage, Result};
use vodforge_db::models::{Asset, NewAsset};
use vodforge_db::pool::DbPool;
use vodforge_db::queries::{assets, job_counts};
use vodforge_db::transaction::{with_retry, RetryPolicy};

use crate::editing::EditTask;
use crate::jobs::{EditPayload, JobPayload, JobQueue, RelocatePayload};
use crate::notifications::{EventBus, NotificationManager, PipelineEvent};
use crate::storage::RelocateDirection;

/// Which optional stages are switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicationSettings {
    pub transcoding_enabled: bool,
    pub object_storage_enabled: bool,
}

/// The state an asset should move to from `current`.
///
/// `None` is a brand-new asset. Move states never go back to transcoding or
/// to another move.
pub fn decide(current: Option<AssetState>, settings: PublicationSettings) -> AssetState {
    let in_move = current.is_some_and(AssetState::is_move_state);
    let transcoded = current == Some(AssetState::ToTranscode);

    if settings.transcoding_enabled && !in_move && !transcoded {
        AssetState::ToTranscode
    } else if settings.object_storage_enabled && !in_move {
        AssetState::ToExternalStorage
    } else {
        AssetState::Published
    }
}

/// Where an advance request comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceContext {
    /// The state before the current pipeline round began; defaults to the
    /// asset's state when the advance starts.
    pub previous_state: Option<AssetState>,
    /// The asset has never been published before.
    pub is_new: bool,
}

impl AdvanceContext {
    pub fn new(previous_state: Option<AssetState>, is_new: bool) -> Self {
        Self {
            previous_state,
            is_new,
        }
    }
}

/// Result of one advance.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// The asset no longer exists.
    Missing,
    /// Already published; re-announced only.
    Republished(Asset),
    /// Outstanding jobs of `stage` must finish first. Nothing changed.
    Waiting {
        state: AssetState,
        stage: JobStage,
        pending: u32,
    },
    /// Moved to transcoding; `jobs` transcoding jobs were enqueued.
    ToTranscode { asset: Asset, jobs: u32 },
    /// Moved to external storage; one relocation job was enqueued.
    ToExternalStorage(Asset),
    Published(Asset),
}

impl AdvanceOutcome {
    pub fn state(&self) -> Option<AssetState> {
        match self {
            Self::Missing => None,
            Self::Waiting { state, .. } => Some(*state),
            Self::Republished(asset)
            | Self::ToTranscode { asset, .. }
            | Self::ToExternalStorage(asset)
            | Self::Published(asset) => Some(asset.state),
        }
    }
}

/// Transactional part of an advance; side effects happen after commit.
struct Step {
    outcome: AdvanceOutcome,
    from: Option<AssetState>,
    previous: Option<AssetState>,
}

pub struct PublicationStateMachine {
    pool: DbPool,
    retry: RetryPolicy,
    settings: PublicationSettings,
    queue: JobQueue,
    notifications: NotificationManager,
    events: EventBus,
}

impl PublicationStateMachine {
    pub fn new(
        pool: DbPool,
        retry: RetryPolicy,
        settings: PublicationSettings,
        queue: JobQueue,
        notifications: NotificationManager,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            retry,
            settings,
            queue,
            notifications,
            events,
        }
    }

    pub fn notifications(&self) -> &NotificationManager {
        &self.notifications
    }

    /// Re-evaluate an asset and move it one step forward.
    ///
    /// `on_transcode` runs inside the transaction that sets
    /// [`AssetState::ToTranscode`] and must enqueue the transcoding work,
    /// returning how many jobs it enqueued. It may run more than once if the
    /// transaction is retried.
    pub async fn advance<H>(
        &self,
        asset_id: AssetId,
        ctx: AdvanceContext,
        mut on_transcode: H,
    ) -> Result<AdvanceOutcome>
    where
        H: FnMut(&Connection, &Asset, AdvanceContext) -> Result<u32>,
    {
        let settings = self.settings;
        let step = with_retry(&self.pool, &self.retry, |tx| {
            let Some(asset) = assets::get_asset(tx, asset_id)? else {
                return Ok(Step {
                    outcome: AdvanceOutcome::Missing,
                    from: None,
                    previous: None,
                });
            };
            let previous = Some(ctx.previous_state.unwrap_or(asset.state));

            if asset.state == AssetState::Published {
                return Ok(Step {
                    outcome: AdvanceOutcome::Republished(asset),
                    from: None,
                    previous,
                });
            }

            let next = decide(Some(asset.state), settings);
            if let Some(waiting) = blocking_stage(tx, &asset, next)? {
                return Ok(Step {
                    outcome: waiting,
                    from: None,
                    previous,
                });
            }

            let moved = transition(tx, &asset, next)?;
            let ctx = AdvanceContext::new(previous, ctx.is_new);
            let outcome = enter(tx, moved, ctx, &mut on_transcode)?;
            Ok(Step {
                outcome,
                from: Some(asset.state),
                previous,
            })
        })
        .await?;

        self.after_commit(step, ctx.is_new).await
    }

    /// Create a brand-new asset directly in its first pipeline state.
    ///
    /// `populate` runs right after the insert in the same transaction, e.g.
    /// to record the uploaded source file.
    pub async fn admit<F, H>(
        &self,
        new: &NewAsset,
        mut populate: F,
        mut on_transcode: H,
    ) -> Result<AdvanceOutcome>
    where
        F: FnMut(&Connection, &Asset) -> Result<()>,
        H: FnMut(&Connection, &Asset, AdvanceContext) -> Result<u32>,
    {
        let first = decide(None, self.settings);
        let new = NewAsset {
            state: first,
            ..new.clone()
        };
        let ctx = AdvanceContext::new(None, true);

        let step = with_retry(&self.pool, &self.retry, |tx| {
            let asset = assets::create_asset(tx, &new)?;
            populate(tx, &asset)?;
            let outcome = enter(tx, asset, ctx, &mut on_transcode)?;
            Ok(Step {
                outcome,
                from: None,
                previous: None,
            })
        })
        .await?;

        tracing::info!(asset_id = %new.id, state = %first, "Admitted asset");
        self.after_commit(step, true).await
    }

    async fn after_commit(&self, step: Step, is_new: bool) -> Result<AdvanceOutcome> {
        let Step {
            outcome,
            from,
            previous,
        } = step;

        if let (Some(from), Some(to)) = (from, outcome.state()) {
            tracing::info!(state_from = %from, state_to = %to, asset_id = ?outcome_asset_id(&outcome), "Asset state changed");
            if let Some(asset_id) = outcome_asset_id(&outcome) {
                self.events.publish(PipelineEvent::StateChanged {
                    asset_id,
                    from,
                    to,
                });
            }
        }

        match &outcome {
            AdvanceOutcome::Missing => {
                tracing::debug!("Asset vanished before it could advance");
            }
            AdvanceOutcome::Waiting {
                state,
                stage,
                pending,
            } => {
                tracing::debug!(state = %state, stage = %stage, pending, "Asset waits for outstanding jobs");
            }
            AdvanceOutcome::ToTranscode { .. } | AdvanceOutcome::ToExternalStorage(_) => {
                self.queue.wake();
            }
            AdvanceOutcome::Republished(asset) => {
                self.notifications.announce(asset).await;
            }
            AdvanceOutcome::Published(asset) => {
                self.notifications.announce(asset).await;
                if previous == Some(AssetState::Editing) {
                    self.notifications.edit_finished(asset).await;
                } else if is_new {
                    self.notifications.new_content(asset).await;
                    if previous == Some(AssetState::ToTranscode) {
                        self.notifications.published_after_transcoding(asset).await;
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Record a failure. Idempotent, and never fails: problems are logged so
    /// they cannot mask the error being reported.
    pub async fn move_to_failed(&self, asset_id: AssetId, kind: FailureKind) {
        let target = kind.state();
        let result = with_retry(&self.pool, &self.retry, |tx| {
            let Some(asset) = assets::get_asset(tx, asset_id)? else {
                return Ok(None);
            };
            if asset.state == target {
                return Ok(None);
            }
            transition(tx, &asset, target)?;
            Ok(Some(asset.state))
        })
        .await;

        match result {
            Ok(Some(from)) => {
                tracing::error!(asset_id = %asset_id, state_from = %from, failure = %kind, "Asset moved to failed state");
                self.events.publish(PipelineEvent::StateChanged {
                    asset_id,
                    from,
                    to: target,
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(asset_id = %asset_id, failure = %kind, "Could not record failure: {}", e);
            }
        }
    }

    /// Start moving an asset's files back to the local file system.
    pub async fn begin_relocation_to_file_system(&self, asset_id: AssetId) -> Result<Asset> {
        let asset = with_retry(&self.pool, &self.retry, |tx| {
            let asset = assets::get_asset(tx, asset_id)?
                .ok_or_else(|| Error::not_found(format!("asset {}", asset_id)))?;
            if asset.state.is_move_state() || asset.state == AssetState::Editing {
                return Err(Error::invalid_input(format!(
                    "asset {} is busy ({})",
                    asset_id, asset.state
                )));
            }

            let moved = transition(tx, &asset, AssetState::ToFileSystem)?;
            JobQueue::register_in(
                tx,
                &JobPayload::RelocateStorage(RelocatePayload {
                    asset_id,
                    direction: RelocateDirection::ToFileSystem,
                    previous_state: Some(asset.state),
                    is_new: false,
                }),
            )?;
            Ok(moved)
        })
        .await?;

        self.queue.wake();
        tracing::info!(asset_id = %asset_id, "Relocation to file system requested");
        Ok(asset)
    }

    /// Put an asset into [`AssetState::Editing`] and enqueue the edit.
    ///
    /// Task kinds are validated before anything is written.
    pub async fn begin_edit(&self, payload: EditPayload) -> Result<Asset> {
        for task in &payload.tasks {
            EditTask::try_from(task)?;
        }
        if payload.tasks.is_empty() {
            return Err(Error::invalid_input("no edit tasks"));
        }

        let asset_id = payload.asset_id;
        let job = JobPayload::Edit(payload);
        let asset = with_retry(&self.pool, &self.retry, |tx| {
            let asset = assets::get_asset(tx, asset_id)?
                .ok_or_else(|| Error::not_found(format!("asset {}", asset_id)))?;
            if matches!(asset.state, AssetState::Editing | AssetState::ToTranscode)
                || asset.state.is_move_state()
            {
                return Err(Error::invalid_input(format!(
                    "asset {} is busy ({})",
                    asset_id, asset.state
                )));
            }

            let moved = transition(tx, &asset, AssetState::Editing)?;
            JobQueue::register_in(tx, &job)?;
            Ok(moved)
        })
        .await?;

        self.queue.wake();
        tracing::info!(asset_id = %asset_id, "Edit requested");
        Ok(asset)
    }
}

fn outcome_asset_id(outcome: &AdvanceOutcome) -> Option<AssetId> {
    match outcome {
        AdvanceOutcome::Missing | AdvanceOutcome::Waiting { .. } => None,
        AdvanceOutcome::Republished(asset)
        | AdvanceOutcome::ToTranscode { asset, .. }
        | AdvanceOutcome::ToExternalStorage(asset)
        | AdvanceOutcome::Published(asset) => Some(asset.id),
    }
}

/// Outstanding work that keeps `asset` from moving to `next`.
fn blocking_stage(
    conn: &Connection,
    asset: &Asset,
    next: AssetState,
) -> Result<Option<AdvanceOutcome>> {
    let mut checks = Vec::with_capacity(2);
    if asset.state == AssetState::Editing {
        checks.push(JobStage::Edit);
    }
    if next != AssetState::ToTranscode {
        checks.push(JobStage::Transcode);
    }
    if asset.state.is_move_state() {
        checks.push(JobStage::Relocate);
    }

    for stage in checks {
        let pending = job_counts::pending(conn, asset.id, stage)?;
        if pending > 0 {
            return Ok(Some(AdvanceOutcome::Waiting {
                state: asset.state,
                stage,
                pending,
            }));
        }
    }
    Ok(None)
}

fn transition(conn: &Connection, asset: &Asset, to: AssetState) -> Result<Asset> {
    assets::update_state(conn, asset.id, asset.version, to)?;
    assets::get_asset(conn, asset.id)?
        .ok_or_else(|| Error::not_found(format!("asset {}", asset.id)))
}

/// Enqueue the work that belongs to the state `asset` just entered.
fn enter<H>(
    conn: &Connection,
    asset: Asset,
    ctx: AdvanceContext,
    on_transcode: &mut H,
) -> Result<AdvanceOutcome>
where
    H: FnMut(&Connection, &Asset, AdvanceContext) -> Result<u32>,
{
    match asset.state {
        AssetState::ToTranscode => {
            let jobs = on_transcode(conn, &asset, ctx)?;
            Ok(AdvanceOutcome::ToTranscode { asset, jobs })
        }
        AssetState::ToExternalStorage => {
            JobQueue::register_in(
                conn,
                &JobPayload::RelocateStorage(RelocatePayload {
                    asset_id: asset.id,
                    direction: RelocateDirection::ToExternal,
                    previous_state: ctx.previous_state,
                    is_new: ctx.is_new,
                }),
            )?;
            Ok(AdvanceOutcome::ToExternalStorage(asset))
        }
        AssetState::Published => Ok(AdvanceOutcome::Published(asset)),
        other => Err(Error::internal(format!(
            "no pipeline work belongs to state {}",
            other
        ))),
    }
}
