//! Asset query operations.
//!
//! State writes are compare-and-swap on `version`: a writer holding a stale
//! snapshot gets `Error::Conflict` and its unit of work is retried.

use rusqlite::{params, Connection, OptionalExtension, Row};
use vodforge_common::{AssetId, AssetState, Error, Result, UserId};

use super::{db_error, now, parse_column, parse_time, timestamp};
use crate::models::{Asset, NewAsset};

const COLUMNS: &str =
    "id, owner_id, name, state, duration_secs, is_live, version, created_at, updated_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Asset> {
    Ok(Asset {
        id: parse_column(row, 0)?,
        owner_id: parse_column(row, 1)?,
        name: row.get(2)?,
        state: parse_column(row, 3)?,
        duration_secs: row.get(4)?,
        is_live: row.get(5)?,
        version: row.get(6)?,
        created_at: parse_time(row, 7)?,
        updated_at: parse_time(row, 8)?,
    })
}

/// Insert a new asset.
pub fn create_asset(conn: &Connection, new: &NewAsset) -> Result<Asset> {
    let now = now();

    conn.execute(
        "INSERT INTO assets (id, owner_id, name, state, duration_secs, is_live, version, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)",
        params![
            new.id.to_string(),
            new.owner_id.to_string(),
            &new.name,
            new.state.as_str(),
            new.duration_secs,
            new.is_live,
            timestamp(now),
            timestamp(now),
        ],
    )
    .map_err(db_error)?;

    Ok(Asset {
        id: new.id,
        owner_id: new.owner_id,
        name: new.name.clone(),
        state: new.state,
        duration_secs: new.duration_secs,
        is_live: new.is_live,
        version: 0,
        created_at: now,
        updated_at: now,
    })
}

/// Load an asset. `None` means it was deleted (or never existed).
pub fn get_asset(conn: &Connection, id: AssetId) -> Result<Option<Asset>> {
    conn.query_row(
        &format!("SELECT {} FROM assets WHERE id = ?", COLUMNS),
        [id.to_string()],
        map_row,
    )
    .optional()
    .map_err(db_error)
}

/// Compare-and-swap the state of an asset.
///
/// Succeeds only if the stored version still equals `expected_version`;
/// returns the new version.
pub fn update_state(
    conn: &Connection,
    id: AssetId,
    expected_version: i64,
    state: AssetState,
) -> Result<i64> {
    let affected = conn
        .execute(
            "UPDATE assets SET state = ?, version = version + 1, updated_at = ?
             WHERE id = ? AND version = ?",
            params![
                state.as_str(),
                timestamp(now()),
                id.to_string(),
                expected_version
            ],
        )
        .map_err(db_error)?;

    if affected == 1 {
        return Ok(expected_version + 1);
    }

    match get_asset(conn, id)? {
        Some(current) => Err(Error::conflict(format!(
            "asset {} is at version {}, expected {}",
            id, current.version, expected_version
        ))),
        None => Err(Error::not_found(format!("asset {}", id))),
    }
}

/// Record the source duration if none is known yet. Returns whether it was set.
pub fn set_duration_if_unset(conn: &Connection, id: AssetId, duration_secs: f64) -> Result<bool> {
    let affected = conn
        .execute(
            "UPDATE assets SET duration_secs = ?, updated_at = ?
             WHERE id = ? AND duration_secs IS NULL",
            params![duration_secs, timestamp(now()), id.to_string()],
        )
        .map_err(db_error)?;

    Ok(affected > 0)
}

/// Overwrite the duration, e.g. after an edit shortened the media.
pub fn set_duration(conn: &Connection, id: AssetId, duration_secs: f64) -> Result<bool> {
    let affected = conn
        .execute(
            "UPDATE assets SET duration_secs = ?, updated_at = ? WHERE id = ?",
            params![duration_secs, timestamp(now()), id.to_string()],
        )
        .map_err(db_error)?;

    Ok(affected > 0)
}

/// List assets currently in any of the given states, oldest first.
pub fn list_by_states(conn: &Connection, states: &[AssetState]) -> Result<Vec<Asset>> {
    if states.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; states.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM assets WHERE state IN ({}) ORDER BY created_at ASC",
        COLUMNS, placeholders
    );
    let mut stmt = conn.prepare(&sql).map_err(db_error)?;

    let names: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
    let assets = stmt
        .query_map(rusqlite::params_from_iter(names), map_row)
        .map_err(db_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_error)?;

    Ok(assets)
}

/// List all assets owned by a user.
pub fn list_by_owner(conn: &Connection, owner_id: UserId) -> Result<Vec<Asset>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM assets WHERE owner_id = ? ORDER BY created_at ASC",
            COLUMNS
        ))
        .map_err(db_error)?;

    let assets = stmt
        .query_map([owner_id.to_string()], map_row)
        .map_err(db_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_error)?;

    Ok(assets)
}

/// Delete an asset. Renditions, job counts and storyboards cascade.
pub fn exists(conn: &Connection, id: AssetId) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM assets WHERE id = ?)",
        [id.to_string()],
        |row| row.get(0),
    )
    .map_err(db_error)
}

pub fn delete_asset(conn: &Connection, id: AssetId) -> Result<bool> {
    let affected = conn
        .execute("DELETE FROM assets WHERE id = ?", [id.to_string()])
        .map_err(db_error)?;
    Ok(affected > 0)
}
