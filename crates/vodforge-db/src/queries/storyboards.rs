//! Storyboard query operations.

use rusqlite::{params, Connection, OptionalExtension, Row};
use vodforge_common::{AssetId, Result, StorageKind};

use super::{db_error, parse_column, parse_time, timestamp, unsigned};
use crate::models::Storyboard;

const COLUMNS: &str = "asset_id, storage, location, sprite_width, sprite_height, \
                       grid_width, grid_height, tile_interval_secs, created_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Storyboard> {
    Ok(Storyboard {
        asset_id: parse_column(row, 0)?,
        storage: parse_column(row, 1)?,
        location: row.get(2)?,
        sprite_width: unsigned(row, 3)?,
        sprite_height: unsigned(row, 4)?,
        grid_width: unsigned(row, 5)?,
        grid_height: unsigned(row, 6)?,
        tile_interval_secs: row.get(7)?,
        created_at: parse_time(row, 8)?,
    })
}

pub fn get_storyboard(conn: &Connection, asset_id: AssetId) -> Result<Option<Storyboard>> {
    conn.query_row(
        &format!("SELECT {} FROM storyboards WHERE asset_id = ?", COLUMNS),
        [asset_id.to_string()],
        map_row,
    )
    .optional()
    .map_err(db_error)
}

/// Store the storyboard of an asset, returning the one it replaces.
pub fn upsert_storyboard(conn: &Connection, storyboard: &Storyboard) -> Result<Option<Storyboard>> {
    let previous = get_storyboard(conn, storyboard.asset_id)?;

    conn.execute(
        "INSERT INTO storyboards (asset_id, storage, location, sprite_width, sprite_height,
                                  grid_width, grid_height, tile_interval_secs, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (asset_id) DO UPDATE SET
             storage = excluded.storage,
             location = excluded.location,
             sprite_width = excluded.sprite_width,
             sprite_height = excluded.sprite_height,
             grid_width = excluded.grid_width,
             grid_height = excluded.grid_height,
             tile_interval_secs = excluded.tile_interval_secs,
             created_at = excluded.created_at",
        params![
            storyboard.asset_id.to_string(),
            storyboard.storage.to_string(),
            &storyboard.location,
            storyboard.sprite_width,
            storyboard.sprite_height,
            storyboard.grid_width,
            storyboard.grid_height,
            storyboard.tile_interval_secs,
            timestamp(storyboard.created_at),
        ],
    )
    .map_err(db_error)?;

    Ok(previous)
}

/// Point a storyboard at a new storage location.
pub fn update_location(
    conn: &Connection,
    asset_id: AssetId,
    storage: StorageKind,
    location: &str,
) -> Result<bool> {
    let affected = conn
        .execute(
            "UPDATE storyboards SET storage = ?, location = ? WHERE asset_id = ?",
            params![storage.to_string(), location, asset_id.to_string()],
        )
        .map_err(db_error)?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAsset;
    use crate::pool::init_memory_pool;
    use crate::queries::{assets, now};
    use vodforge_common::{AssetState, UserId};

    fn storyboard(asset_id: AssetId, location: &str) -> Storyboard {
        Storyboard {
            asset_id,
            storage: StorageKind::FileSystem,
            location: location.to_string(),
            sprite_width: 192,
            sprite_height: 108,
            grid_width: 6,
            grid_height: 2,
            tile_interval_secs: 1.0,
            created_at: now(),
        }
    }

    #[test]
    fn test_upsert_replaces_previous() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let asset = assets::create_asset(
            &conn,
            &NewAsset::new(UserId::new(), "clip", AssetState::Published),
        )
        .unwrap();

        assert!(upsert_storyboard(&conn, &storyboard(asset.id, "/sb/one.jpg"))
            .unwrap()
            .is_none());

        let previous = upsert_storyboard(&conn, &storyboard(asset.id, "/sb/two.jpg"))
            .unwrap()
            .unwrap();
        assert_eq!(previous.location, "/sb/one.jpg");

        let current = get_storyboard(&conn, asset.id).unwrap().unwrap();
        assert_eq!(current.location, "/sb/two.jpg");
        assert_eq!((current.grid_width, current.grid_height), (6, 2));
    }

    #[test]
    fn test_update_location() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let asset = assets::create_asset(
            &conn,
            &NewAsset::new(UserId::new(), "clip", AssetState::Published),
        )
        .unwrap();
        upsert_storyboard(&conn, &storyboard(asset.id, "/sb/one.jpg")).unwrap();

        assert!(update_location(&conn, asset.id, StorageKind::ObjectStorage, "sb/one.jpg").unwrap());
        let current = get_storyboard(&conn, asset.id).unwrap().unwrap();
        assert_eq!(current.storage, StorageKind::ObjectStorage);
    }
}
