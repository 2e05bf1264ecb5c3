//! Workers pulling jobs off the persisted queue.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vodforge_common::{Error, JobId, Result};
use vodforge_db::pool::get_conn;
use vodforge_db::queries::jobs;

use super::{handlers, JobPayload};
use crate::notifications::PipelineEvent;
use crate::pipeline::Pipeline;

/// What one call to [`run_next_job`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRun {
    Idle,
    Completed(JobId),
    Failed(JobId),
}

/// Claim the oldest queued job and run it to completion.
///
/// Handler errors and panics mark the job failed; only queue bookkeeping
/// errors are returned.
pub async fn run_next_job(pipeline: &Pipeline, worker: &str) -> Result<JobRun> {
    let job = {
        let conn = get_conn(&pipeline.pool)?;
        jobs::dequeue_next_job(&conn, worker)?
    };
    let Some(job) = job else {
        return Ok(JobRun::Idle);
    };

    tracing::info!(job_id = %job.id, kind = %job.kind, worker, "Running job");
    pipeline.events.publish(PipelineEvent::JobStarted {
        job_id: job.id,
        kind: job.kind.clone(),
        asset_id: job.asset_id,
    });

    let outcome = match JobPayload::from_job(&job) {
        Ok(payload) => AssertUnwindSafe(handlers::dispatch(pipeline, payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::internal(panic_message(panic.as_ref())))),
        Err(e) => Err(e),
    };

    let conn = get_conn(&pipeline.pool)?;
    match outcome {
        Ok(()) => {
            jobs::complete_job(&conn, job.id)?;
            tracing::info!(job_id = %job.id, kind = %job.kind, "Job completed");
            pipeline.events.publish(PipelineEvent::JobCompleted {
                job_id: job.id,
                kind: job.kind,
            });
            Ok(JobRun::Completed(job.id))
        }
        Err(e) => {
            let message = e.to_string();
            jobs::fail_job(&conn, job.id, &message)?;
            tracing::error!(job_id = %job.id, kind = %job.kind, "Job failed: {}", message);
            pipeline.events.publish(PipelineEvent::JobFailed {
                job_id: job.id,
                kind: job.kind,
                error: message,
            });
            Ok(JobRun::Failed(job.id))
        }
    }
}

/// Run jobs on the calling task until the queue is empty, including jobs
/// enqueued by the jobs it ran. Returns how many ran.
pub async fn run_until_idle(pipeline: &Pipeline) -> Result<usize> {
    let mut ran = 0;
    while run_next_job(pipeline, "inline").await? != JobRun::Idle {
        ran += 1;
    }
    Ok(ran)
}

/// Start `jobs.concurrency` workers that run until `cancel` fires.
pub fn spawn_workers(pipeline: Arc<Pipeline>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let count = pipeline.config.jobs.concurrency.max(1);
    tracing::info!(workers = count, "Starting job workers");

    (0..count)
        .map(|n| {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            let name = format!("worker-{n}");
            tokio::spawn(async move { work(pipeline, cancel, name).await })
        })
        .collect()
}

async fn work(pipeline: Arc<Pipeline>, cancel: CancellationToken, name: String) {
    let poll = pipeline.config.poll_interval();
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match run_next_job(&pipeline, &name).await {
            Ok(JobRun::Idle) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = pipeline.queue.idle(poll) => {}
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(worker = %name, "Queue error: {}", e);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        }
    }
    tracing::info!(worker = %name, "Worker stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("job panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("job panicked: {s}")
    } else {
        "job panicked".to_string()
    }
}
