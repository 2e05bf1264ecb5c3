//! Rendition query operations.

use rusqlite::{params, Connection, OptionalExtension, Row};
use vodforge_common::{AssetId, ContainerKind, RenditionId, Result, StorageKind, UserId};

use super::{db_error, now, parse_column, parse_time, timestamp, unsigned};
use crate::models::{NewRendition, Rendition, RenditionKey};

const COLUMNS: &str = "id, asset_id, container, resolution, fps, storage, location, \
                       playlist_location, size_bytes, descriptor, created_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Rendition> {
    let size: i64 = row.get(8)?;
    Ok(Rendition {
        id: parse_column(row, 0)?,
        asset_id: parse_column(row, 1)?,
        container: parse_column(row, 2)?,
        resolution: unsigned(row, 3)?,
        fps: row.get(4)?,
        storage: parse_column(row, 5)?,
        location: row.get(6)?,
        playlist_location: row.get(7)?,
        size_bytes: u64::try_from(size)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(8, size))?,
        descriptor: row.get(9)?,
        created_at: parse_time(row, 10)?,
    })
}

fn size_to_sql(size: u64) -> Result<i64> {
    i64::try_from(size).map_err(|_| vodforge_common::Error::invalid_input("file size too large"))
}

/// Insert a rendition. Fails if one already exists for the same key.
pub fn insert_rendition(conn: &Connection, new: &NewRendition) -> Result<Rendition> {
    let id = RenditionId::new();
    let now = now();

    conn.execute(
        &format!(
            "INSERT INTO renditions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            COLUMNS
        ),
        params![
            id.to_string(),
            new.asset_id.to_string(),
            new.container.as_str(),
            new.resolution,
            new.fps,
            new.storage.to_string(),
            &new.location,
            &new.playlist_location,
            size_to_sql(new.size_bytes)?,
            &new.descriptor,
            timestamp(now),
        ],
    )
    .map_err(db_error)?;

    Ok(Rendition {
        id,
        asset_id: new.asset_id,
        container: new.container,
        resolution: new.resolution,
        fps: new.fps,
        storage: new.storage,
        location: new.location.clone(),
        playlist_location: new.playlist_location.clone(),
        size_bytes: new.size_bytes,
        descriptor: new.descriptor.clone(),
        created_at: now,
    })
}

/// Outcome of [`replace_rendition`].
#[derive(Debug, Clone, PartialEq)]
pub struct Replaced {
    pub current: Rendition,
    /// The row that held the same key before, if any. Its file is now orphaned.
    pub superseded: Option<Rendition>,
}

/// Swap in a new rendition for its key, removing any previous row.
///
/// Must run inside a transaction so readers never observe the key with zero
/// or two rows.
pub fn replace_rendition(conn: &Connection, new: &NewRendition) -> Result<Replaced> {
    let superseded = get_by_key(conn, new.asset_id, new.key())?;
    if let Some(old) = &superseded {
        delete_rendition(conn, old.id)?;
    }
    let current = insert_rendition(conn, new)?;
    Ok(Replaced {
        current,
        superseded,
    })
}

pub fn get_rendition(conn: &Connection, id: RenditionId) -> Result<Option<Rendition>> {
    conn.query_row(
        &format!("SELECT {} FROM renditions WHERE id = ?", COLUMNS),
        [id.to_string()],
        map_row,
    )
    .optional()
    .map_err(db_error)
}

/// Find the rendition of an asset for a container and resolution.
pub fn get_by_key(
    conn: &Connection,
    asset_id: AssetId,
    key: RenditionKey,
) -> Result<Option<Rendition>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM renditions WHERE asset_id = ? AND container = ? AND resolution = ?",
            COLUMNS
        ),
        params![asset_id.to_string(), key.container.as_str(), key.resolution],
        map_row,
    )
    .optional()
    .map_err(db_error)
}

/// All renditions of an asset, ordered by key.
pub fn list_for_asset(conn: &Connection, asset_id: AssetId) -> Result<Vec<Rendition>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM renditions WHERE asset_id = ?",
            COLUMNS
        ))
        .map_err(db_error)?;

    let mut renditions = stmt
        .query_map([asset_id.to_string()], map_row)
        .map_err(db_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_error)?;
    renditions.sort_by_key(Rendition::key);

    Ok(renditions)
}

/// The highest-resolution rendition, preferring a single-file container.
pub fn max_quality(conn: &Connection, asset_id: AssetId) -> Result<Option<Rendition>> {
    let renditions = list_for_asset(conn, asset_id)?;
    Ok(renditions
        .into_iter()
        .max_by_key(|r| (r.resolution, r.container == ContainerKind::WebVideo)))
}

/// Point a rendition at a new storage location.
pub fn update_location(
    conn: &Connection,
    id: RenditionId,
    storage: StorageKind,
    location: &str,
    playlist_location: Option<&str>,
) -> Result<bool> {
    let affected = conn
        .execute(
            "UPDATE renditions SET storage = ?, location = ?, playlist_location = ? WHERE id = ?",
            params![storage.to_string(), location, playlist_location, id.to_string()],
        )
        .map_err(db_error)?;
    Ok(affected > 0)
}

pub fn delete_rendition(conn: &Connection, id: RenditionId) -> Result<bool> {
    let affected = conn
        .execute("DELETE FROM renditions WHERE id = ?", [id.to_string()])
        .map_err(db_error)?;
    Ok(affected > 0)
}

/// Total bytes stored across all renditions of a user's assets.
pub fn total_size_for_owner(conn: &Connection, owner_id: UserId) -> Result<u64> {
    let total: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(r.size_bytes), 0)
             FROM renditions r JOIN assets a ON a.id = r.asset_id
             WHERE a.owner_id = ?",
            [owner_id.to_string()],
            |row| row.get(0),
        )
        .map_err(db_error)?;
    Ok(u64::try_from(total).unwrap_or(0))
}
