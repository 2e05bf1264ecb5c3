//! Deleting superseded files.
//!
//! Rows are written by the same transaction that detaches the file from its
//! asset; the bytes are removed here, after commit. Failed deletions stay in
//! the table for the next sweep.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use vodforge_common::{AssetId, Result, StorageKind};
use vodforge_db::pool::{get_conn, DbPool};
use vodforge_db::queries::file_removals;

use super::{remove_local, ObjectStore};

/// A deletion recorded in the database but not yet carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRemoval {
    pub id: i64,
    pub storage: StorageKind,
    pub location: String,
}

/// Record `location` for deletion inside the caller's transaction.
pub fn schedule(
    conn: &Connection,
    asset_id: AssetId,
    storage: StorageKind,
    location: &str,
) -> Result<ScheduledRemoval> {
    let id = file_removals::schedule_removal(conn, asset_id, storage, location)?;
    Ok(ScheduledRemoval {
        id,
        storage,
        location: location.to_string(),
    })
}

async fn delete(
    object_store: Option<&Arc<dyn ObjectStore>>,
    removal: &ScheduledRemoval,
) -> Result<()> {
    match removal.storage {
        StorageKind::FileSystem => remove_local(Path::new(&removal.location)).await,
        StorageKind::ObjectStorage => match object_store {
            Some(store) => store.delete(&removal.location).await,
            None => Err(vodforge_common::Error::storage(
                "object storage is not configured",
            )),
        },
    }
}

/// Carry out removals that were just committed. Returns how many succeeded.
///
/// Never fails: errors are recorded on the row and logged.
pub async fn execute_removals(
    pool: &DbPool,
    object_store: Option<&Arc<dyn ObjectStore>>,
    removals: &[ScheduledRemoval],
) -> usize {
    let mut done = 0;
    for removal in removals {
        let outcome = delete(object_store, removal).await;
        let recorded = get_conn(pool).and_then(|conn| match &outcome {
            Ok(()) => file_removals::complete_removal(&conn, removal.id),
            Err(e) => file_removals::record_failure(&conn, removal.id, &e.to_string()),
        });

        match (&outcome, recorded) {
            (Ok(()), Ok(())) => {
                tracing::debug!(location = %removal.location, "Removed superseded file");
                done += 1;
            }
            (Err(e), _) => {
                tracing::warn!(location = %removal.location, "Failed to remove superseded file: {}", e);
            }
            (Ok(()), Err(e)) => {
                tracing::warn!(removal_id = removal.id, "Failed to record removal: {}", e);
                done += 1;
            }
        }
    }
    done
}

/// Retry every pending removal, in batches. Returns how many succeeded.
pub async fn purge_scheduled_removals(
    pool: &DbPool,
    object_store: Option<&Arc<dyn ObjectStore>>,
) -> Result<usize> {
    const BATCH: usize = 100;

    let pending: Vec<ScheduledRemoval> = {
        let conn = get_conn(pool)?;
        file_removals::list_pending(&conn, BATCH)?
            .into_iter()
            .map(|r| ScheduledRemoval {
                id: r.id,
                storage: r.storage,
                location: r.location,
            })
            .collect()
    };

    if pending.is_empty() {
        return Ok(0);
    }
    tracing::info!("Purging {} scheduled file removals", pending.len());
    Ok(execute_removals(pool, object_store, &pending).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DirectoryObjectStore;
    use tempfile::TempDir;
    use vodforge_db::pool::init_memory_pool;

    #[tokio::test]
    async fn test_execute_removes_local_files() {
        let pool = init_memory_pool().unwrap();
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("old.mp4");
        std::fs::write(&file, b"x").unwrap();

        let removal = {
            let conn = pool.get().unwrap();
            schedule(
                &conn,
                AssetId::new(),
                StorageKind::FileSystem,
                file.to_str().unwrap(),
            )
            .unwrap()
        };

        assert_eq!(execute_removals(&pool, None, &[removal]).await, 1);
        assert!(!file.exists());
        let conn = pool.get().unwrap();
        assert!(file_removals::list_pending(&conn, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_object_removal_without_store_stays_pending() {
        let pool = init_memory_pool().unwrap();
        let removal = {
            let conn = pool.get().unwrap();
            schedule(&conn, AssetId::new(), StorageKind::ObjectStorage, "web-videos/a.mp4")
                .unwrap()
        };

        assert_eq!(execute_removals(&pool, None, &[removal]).await, 0);
        let conn = pool.get().unwrap();
        let pending = file_removals::list_pending(&conn, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.is_some());
    }

    #[tokio::test]
    async fn test_purge_uses_object_store() {
        let pool = init_memory_pool().unwrap();
        let bucket = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(DirectoryObjectStore::new(bucket.path()));
        std::fs::create_dir_all(bucket.path().join("web-videos")).unwrap();
        std::fs::write(bucket.path().join("web-videos/a.mp4"), b"x").unwrap();

        {
            let conn = pool.get().unwrap();
            schedule(&conn, AssetId::new(), StorageKind::ObjectStorage, "web-videos/a.mp4")
                .unwrap();
        }

        assert_eq!(purge_scheduled_removals(&pool, Some(&store)).await.unwrap(), 1);
        assert!(!bucket.path().join("web-videos/a.mp4").exists());
        assert_eq!(purge_scheduled_removals(&pool, Some(&store)).await.unwrap(), 0);
    }
}
