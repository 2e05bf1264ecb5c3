//! Scheduled deletion of superseded files.
//!
//! Replacing a file records the old location here in the same transaction
//! that swaps the database row. The file itself is deleted after commit;
//! entries whose deletion failed stay behind for a later sweep.

use rusqlite::{params, Connection};
use vodforge_common::{AssetId, Result, StorageKind};

use super::{db_error, now, parse_column, parse_time, timestamp, unsigned};
use crate::models::FileRemoval;

/// Record a file for deletion. Returns the removal ID.
pub fn schedule_removal(
    conn: &Connection,
    asset_id: AssetId,
    storage: StorageKind,
    location: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO file_removals (asset_id, storage, location, scheduled_at) VALUES (?, ?, ?, ?)",
        params![
            asset_id.to_string(),
            storage.to_string(),
            location,
            timestamp(now())
        ],
    )
    .map_err(db_error)?;

    Ok(conn.last_insert_rowid())
}

/// Removals still waiting to be carried out, oldest first.
pub fn list_pending(conn: &Connection, limit: usize) -> Result<Vec<FileRemoval>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, asset_id, storage, location, attempts, last_error, scheduled_at
             FROM file_removals ORDER BY id ASC LIMIT ?",
        )
        .map_err(db_error)?;

    let removals = stmt
        .query_map([limit as i64], |row| {
            Ok(FileRemoval {
                id: row.get(0)?,
                asset_id: parse_column(row, 1)?,
                storage: parse_column(row, 2)?,
                location: row.get(3)?,
                attempts: unsigned(row, 4)?,
                last_error: row.get(5)?,
                scheduled_at: parse_time(row, 6)?,
            })
        })
        .map_err(db_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_error)?;

    Ok(removals)
}

/// The file is gone; forget the removal.
pub fn complete_removal(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM file_removals WHERE id = ?", [id])
        .map_err(db_error)?;
    Ok(())
}

/// Deletion failed; keep the entry and remember why.
pub fn record_failure(conn: &Connection, id: i64, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE file_removals SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        params![error, id],
    )
    .map_err(db_error)?;
    Ok(())
}
