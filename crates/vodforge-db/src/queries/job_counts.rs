//! Per-asset pending job accounting.
//!
//! Counts are adjusted in the same transaction that enqueues or finishes the
//! corresponding jobs, so a count of zero means every job of the stage is done.

use rusqlite::{params, Connection, OptionalExtension};
use vodforge_common::{AssetId, JobStage, Result};

use super::{db_error, parse_column, unsigned};
use crate::models::PendingJobCount;

/// Add `by` outstanding jobs for a stage.
pub fn increment(conn: &Connection, asset_id: AssetId, stage: JobStage, by: u32) -> Result<u32> {
    conn.execute(
        "INSERT INTO asset_job_counts (asset_id, stage, pending) VALUES (?, ?, ?)
         ON CONFLICT (asset_id, stage) DO UPDATE SET pending = pending + excluded.pending",
        params![asset_id.to_string(), stage.to_string(), by],
    )
    .map_err(db_error)?;

    pending(conn, asset_id, stage)
}

/// Mark one job of a stage finished. Returns the remaining count, never below zero.
pub fn decrement(conn: &Connection, asset_id: AssetId, stage: JobStage) -> Result<u32> {
    conn.execute(
        "UPDATE asset_job_counts SET pending = pending - 1
         WHERE asset_id = ? AND stage = ? AND pending > 0",
        params![asset_id.to_string(), stage.to_string()],
    )
    .map_err(db_error)?;

    pending(conn, asset_id, stage)
}

/// Outstanding jobs of a stage; zero when none were ever registered.
pub fn pending(conn: &Connection, asset_id: AssetId, stage: JobStage) -> Result<u32> {
    let count: Option<i64> = conn
        .query_row(
            "SELECT pending FROM asset_job_counts WHERE asset_id = ? AND stage = ?",
            params![asset_id.to_string(), stage.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)?;

    Ok(count.and_then(|c| u32::try_from(c).ok()).unwrap_or(0))
}

/// Every stage counter of an asset.
pub fn list_for_asset(conn: &Connection, asset_id: AssetId) -> Result<Vec<PendingJobCount>> {
    let mut stmt = conn
        .prepare(
            "SELECT asset_id, stage, pending FROM asset_job_counts
             WHERE asset_id = ? ORDER BY stage",
        )
        .map_err(db_error)?;

    let counts = stmt
        .query_map([asset_id.to_string()], |row| {
            Ok(PendingJobCount {
                asset_id: parse_column(row, 0)?,
                stage: parse_column(row, 1)?,
                pending: unsigned(row, 2)?,
            })
        })
        .map_err(db_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_error)?;

    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAsset;
    use crate::pool::{init_memory_pool, PooledConnection};
    use crate::queries::assets;
    use vodforge_common::{AssetState, UserId};

    fn setup() -> (PooledConnection, AssetId) {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let asset = assets::create_asset(
            &conn,
            &NewAsset::new(UserId::new(), "clip", AssetState::ToTranscode),
        )
        .unwrap();
        (conn, asset.id)
    }

    #[test]
    fn test_unregistered_stage_is_zero() {
        let (conn, asset_id) = setup();
        assert_eq!(pending(&conn, asset_id, JobStage::Transcode).unwrap(), 0);
    }

    #[test]
    fn test_increment_accumulates() {
        let (conn, asset_id) = setup();
        assert_eq!(increment(&conn, asset_id, JobStage::Transcode, 3).unwrap(), 3);
        assert_eq!(increment(&conn, asset_id, JobStage::Transcode, 2).unwrap(), 5);
        assert_eq!(pending(&conn, asset_id, JobStage::Relocate).unwrap(), 0);
    }

    #[test]
    fn test_decrement_stops_at_zero() {
        let (conn, asset_id) = setup();
        increment(&conn, asset_id, JobStage::Transcode, 2).unwrap();

        assert_eq!(decrement(&conn, asset_id, JobStage::Transcode).unwrap(), 1);
        assert_eq!(decrement(&conn, asset_id, JobStage::Transcode).unwrap(), 0);
        assert_eq!(decrement(&conn, asset_id, JobStage::Transcode).unwrap(), 0);
    }

    #[test]
    fn test_list_for_asset() {
        let (conn, asset_id) = setup();
        increment(&conn, asset_id, JobStage::Transcode, 1).unwrap();
        increment(&conn, asset_id, JobStage::Relocate, 4).unwrap();

        let counts = list_for_asset(&conn, asset_id).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].stage, JobStage::Relocate);
        assert_eq!(counts[0].pending, 4);
    }
}
