//! Persisted job query operations.
//!
//! Jobs move `queued -> running -> completed | failed`. Claiming a job is a
//! single conditional UPDATE, so two workers can never run the same job.

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use vodforge_common::{AssetId, Error, JobId, Result};

use super::{
    db_error, now, parse_column, parse_optional_column, parse_optional_time, parse_time,
    timestamp, unsigned,
};
use crate::models::{Job, JobStatus};

const COLUMNS: &str = "id, kind, asset_id, payload, status, attempts, worker, error_message, \
                       created_at, started_at, completed_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let payload: String = row.get(3)?;
    Ok(Job {
        id: parse_column(row, 0)?,
        kind: row.get(1)?,
        asset_id: parse_optional_column(row, 2)?,
        payload: serde_json::from_str(&payload).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        status: parse_column(row, 4)?,
        attempts: unsigned(row, 5)?,
        worker: row.get(6)?,
        error_message: row.get(7)?,
        created_at: parse_time(row, 8)?,
        started_at: parse_optional_time(row, 9)?,
        completed_at: parse_optional_time(row, 10)?,
    })
}

/// Insert a queued job.
pub fn create_job(
    conn: &Connection,
    kind: &str,
    asset_id: Option<AssetId>,
    payload: &serde_json::Value,
) -> Result<Job> {
    let id = JobId::new();
    let now = now();

    conn.execute(
        "INSERT INTO jobs (id, kind, asset_id, payload, status, created_at)
         VALUES (?, ?, ?, ?, 'queued', ?)",
        params![
            id.to_string(),
            kind,
            asset_id.map(|a| a.to_string()),
            payload.to_string(),
            timestamp(now),
        ],
    )
    .map_err(db_error)?;

    Ok(Job {
        id,
        kind: kind.to_string(),
        asset_id,
        payload: payload.clone(),
        status: JobStatus::Queued,
        attempts: 0,
        worker: None,
        error_message: None,
        created_at: now,
        started_at: None,
        completed_at: None,
    })
}

pub fn get_job(conn: &Connection, id: JobId) -> Result<Job> {
    conn.query_row(
        &format!("SELECT {} FROM jobs WHERE id = ?", COLUMNS),
        [id.to_string()],
        map_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found(format!("job {}", id)),
        _ => db_error(e),
    })
}

/// Claim the oldest queued job for `worker` (FIFO).
pub fn dequeue_next_job(conn: &Connection, worker: &str) -> Result<Option<Job>> {
    conn.query_row(
        &format!(
            "UPDATE jobs SET status = 'running', worker = ?, started_at = ?, attempts = attempts + 1
             WHERE id = (
                 SELECT id FROM jobs WHERE status = 'queued'
                 ORDER BY created_at ASC, rowid ASC LIMIT 1
             ) AND status = 'queued'
             RETURNING {}",
            COLUMNS
        ),
        params![worker, timestamp(now())],
        map_row,
    )
    .optional()
    .map_err(db_error)
}

fn finish(conn: &Connection, id: JobId, status: JobStatus, error: Option<&str>) -> Result<()> {
    let affected = conn
        .execute(
            "UPDATE jobs SET status = ?, error_message = ?, completed_at = ?
             WHERE id = ? AND status = 'running'",
            params![status.to_string(), error, timestamp(now()), id.to_string()],
        )
        .map_err(db_error)?;

    if affected == 0 {
        return Err(Error::not_found(format!("running job {}", id)));
    }
    Ok(())
}

/// Complete a running job successfully.
pub fn complete_job(conn: &Connection, id: JobId) -> Result<()> {
    finish(conn, id, JobStatus::Completed, None)
}

/// Fail a running job with an error message.
pub fn fail_job(conn: &Connection, id: JobId, error_message: &str) -> Result<()> {
    finish(conn, id, JobStatus::Failed, Some(error_message))
}

/// Put jobs left `running` by a previous process back in the queue.
///
/// Only safe at startup, before any worker of this process has claimed a job.
pub fn reset_orphaned_jobs(conn: &Connection) -> Result<usize> {
    conn.execute(
        "UPDATE jobs SET status = 'queued', worker = NULL, started_at = NULL
         WHERE status = 'running'",
        [],
    )
    .map_err(db_error)
}

/// List jobs by status, oldest first.
pub fn list_jobs_by_status(conn: &Connection, status: JobStatus, limit: usize) -> Result<Vec<Job>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM jobs WHERE status = ? ORDER BY created_at ASC, rowid ASC LIMIT ?",
            COLUMNS
        ))
        .map_err(db_error)?;

    let jobs = stmt
        .query_map(params![status.to_string(), limit as i64], map_row)
        .map_err(db_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_error)?;

    Ok(jobs)
}

/// List all jobs referencing an asset, oldest first.
pub fn list_jobs_for_asset(conn: &Connection, asset_id: AssetId) -> Result<Vec<Job>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM jobs WHERE asset_id = ? ORDER BY created_at ASC, rowid ASC",
            COLUMNS
        ))
        .map_err(db_error)?;

    let jobs = stmt
        .query_map([asset_id.to_string()], map_row)
        .map_err(db_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_error)?;

    Ok(jobs)
}

/// Number of jobs in each status.
pub fn count_by_status(conn: &Connection) -> Result<Vec<(JobStatus, u64)>> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status ORDER BY status")
        .map_err(db_error)?;

    let counts = stmt
        .query_map([], |row| {
            let count: i64 = row.get(1)?;
            Ok((parse_column(row, 0)?, count.max(0) as u64))
        })
        .map_err(db_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_error)?;

    Ok(counts)
}

/// Delete finished jobs older than `days`.
pub fn prune_old_jobs(conn: &Connection, days: u32) -> Result<usize> {
    let cutoff = Utc::now() - Duration::days(i64::from(days));
    conn.execute(
        "DELETE FROM jobs WHERE status IN ('completed', 'failed') AND completed_at < ?",
        [timestamp(cutoff)],
    )
    .map_err(db_error)
}
