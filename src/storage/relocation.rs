//! Moving an asset's files between the local file system and the object store.
//!
//! Each rendition is moved in its own transaction, so a relocation that dies
//! halfway can simply be run again: files already on the target storage are
//! skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vodforge_common::{ContainerKind, FailureKind, Result, StorageKind};
use vodforge_db::models::{Asset, Rendition};
use vodforge_db::pool::{get_conn, DbPool};
use vodforge_db::queries::{renditions, storyboards};
use vodforge_db::transaction::{with_retry, RetryPolicy};

use super::{
    execute_removals, file_name_of, location_of, remove_local, removals, ArtifactKind,
    ObjectStore, ScheduledRemoval, StorageLayout, MASTER_PLAYLIST,
};
use crate::locks::AssetLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelocateDirection {
    ToExternal,
    ToFileSystem,
}

impl RelocateDirection {
    /// Storage the files end up on.
    pub fn target(self) -> StorageKind {
        match self {
            Self::ToExternal => StorageKind::ObjectStorage,
            Self::ToFileSystem => StorageKind::FileSystem,
        }
    }

    /// Failure recorded when this relocation cannot complete.
    pub fn failure(self) -> FailureKind {
        match self {
            Self::ToExternal => FailureKind::ExternalStorage,
            Self::ToFileSystem => FailureKind::FileSystem,
        }
    }
}

impl std::fmt::Display for RelocateDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToExternal => write!(f, "to-external"),
            Self::ToFileSystem => write!(f, "to-file-system"),
        }
    }
}

/// What one relocation moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelocationReport {
    pub renditions: usize,
    pub storyboard: bool,
    /// Source copies deleted after the move.
    pub removed: usize,
}

/// Where a file lives before and after a move.
struct Move {
    from: String,
    to: String,
}

pub struct Relocator {
    pool: DbPool,
    retry: RetryPolicy,
    layout: StorageLayout,
    store: Arc<dyn ObjectStore>,
}

impl Relocator {
    pub fn new(
        pool: DbPool,
        retry: RetryPolicy,
        layout: StorageLayout,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            pool,
            retry,
            layout,
            store,
        }
    }

    /// Move every file of `asset` to the storage `direction` points at.
    pub async fn relocate(
        &self,
        lock: &AssetLock,
        asset: &Asset,
        direction: RelocateDirection,
    ) -> Result<RelocationReport> {
        lock.covers(asset.id)?;
        let target = direction.target();

        let (pending, storyboard) = {
            let conn = get_conn(&self.pool)?;
            let all = renditions::list_for_asset(&conn, asset.id)?;
            let storyboard = storyboards::get_storyboard(&conn, asset.id)?;
            (all, storyboard)
        };
        let has_hls = pending.iter().any(|r| r.container == ContainerKind::Hls);

        let mut report = RelocationReport::default();
        for rendition in pending.iter().filter(|r| r.storage != target) {
            report.removed += self.move_rendition(asset, rendition, direction).await?;
            report.renditions += 1;
        }

        if has_hls {
            self.move_master_playlist(asset, direction).await?;
        }

        if let Some(storyboard) = storyboard.filter(|s| s.storage != target) {
            let step = self
                .transfer(ArtifactKind::Storyboard, asset, &storyboard.location, direction)
                .await?;
            let scheduled = with_retry(&self.pool, &self.retry, |tx| {
                storyboards::update_location(tx, asset.id, target, &step.to)?;
                removals::schedule(tx, asset.id, storyboard.storage, &step.from)
            })
            .await?;
            report.removed += self.cleanup(&[scheduled]).await;
            report.storyboard = true;
        }

        tracing::info!(
            asset_id = %asset.id,
            direction = %direction,
            renditions = report.renditions,
            storyboard = report.storyboard,
            "Relocated asset files"
        );
        Ok(report)
    }

    async fn move_rendition(
        &self,
        asset: &Asset,
        rendition: &Rendition,
        direction: RelocateDirection,
    ) -> Result<usize> {
        let kind = ArtifactKind::from(rendition.container);
        let media = self
            .transfer(kind, asset, &rendition.location, direction)
            .await?;
        let playlist = match &rendition.playlist_location {
            Some(location) => Some(self.transfer(kind, asset, location, direction).await?),
            None => None,
        };

        let target = direction.target();
        let scheduled = with_retry(&self.pool, &self.retry, |tx| {
            renditions::update_location(
                tx,
                rendition.id,
                target,
                &media.to,
                playlist.as_ref().map(|p| p.to.as_str()),
            )?;
            let mut scheduled =
                vec![removals::schedule(tx, asset.id, rendition.storage, &media.from)?];
            if let Some(p) = &playlist {
                scheduled.push(removals::schedule(tx, asset.id, rendition.storage, &p.from)?);
            }
            Ok(scheduled)
        })
        .await?;

        tracing::debug!(
            asset_id = %asset.id,
            rendition_id = %rendition.id,
            location = %media.to,
            "Moved rendition"
        );
        Ok(self.cleanup(&scheduled).await)
    }

    /// Copy one file to the other storage. The source stays in place.
    async fn transfer(
        &self,
        kind: ArtifactKind,
        asset: &Asset,
        location: &str,
        direction: RelocateDirection,
    ) -> Result<Move> {
        let name = file_name_of(location)?;
        match direction {
            RelocateDirection::ToExternal => {
                let key = self.layout.object_key(kind, asset.id, name);
                self.store.put(Path::new(location), &key).await?;
                Ok(Move {
                    from: location.to_string(),
                    to: key,
                })
            }
            RelocateDirection::ToFileSystem => {
                let dest = self.layout.local_path(kind, asset.id, name);
                self.store.get(location, &dest).await?;
                Ok(Move {
                    from: location.to_string(),
                    to: location_of(&dest)?,
                })
            }
        }
    }

    /// The master playlist is not tracked in the database; it follows the
    /// renditions directly.
    async fn move_master_playlist(&self, asset: &Asset, direction: RelocateDirection) -> Result<()> {
        let local: PathBuf = self.layout.master_playlist(asset.id);
        let key = self
            .layout
            .object_key(ArtifactKind::Hls, asset.id, MASTER_PLAYLIST);

        match direction {
            RelocateDirection::ToExternal => {
                if !tokio::fs::try_exists(&local).await? {
                    return Ok(());
                }
                self.store.put(&local, &key).await?;
                remove_local(&local).await
            }
            RelocateDirection::ToFileSystem => {
                self.store.get(&key, &local).await?;
                if let Err(e) = self.store.delete(&key).await {
                    tracing::warn!(asset_id = %asset.id, key = %key, "Failed to delete master playlist: {}", e);
                }
                Ok(())
            }
        }
    }

    async fn cleanup(&self, scheduled: &[ScheduledRemoval]) -> usize {
        execute_removals(&self.pool, Some(&self.store), scheduled).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::locks::FileLockManager;
    use crate::storage::DirectoryObjectStore;
    use tempfile::TempDir;
    use vodforge_common::{AssetState, UserId};
    use vodforge_db::models::{NewAsset, NewRendition};
    use vodforge_db::pool::init_memory_pool;
    use vodforge_db::queries::{assets, file_removals};

    struct Fixture {
        _dir: TempDir,
        pool: DbPool,
        layout: StorageLayout,
        relocator: Relocator,
        bucket: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = init_memory_pool().unwrap();
        let layout = StorageLayout::new(StorageConfig::rooted_at(dir.path().join("data")));
        let bucket = dir.path().join("bucket");
        let store: Arc<dyn ObjectStore> = Arc::new(DirectoryObjectStore::new(&bucket));
        let relocator = Relocator::new(pool.clone(), RetryPolicy::default(), layout.clone(), store);
        Fixture {
            _dir: dir,
            pool,
            layout,
            relocator,
            bucket,
        }
    }

    fn asset_with_web_video(fx: &Fixture) -> (Asset, PathBuf) {
        let conn = fx.pool.get().unwrap();
        let asset = assets::create_asset(
            &conn,
            &NewAsset::new(UserId::new(), "clip", AssetState::ToExternalStorage),
        )
        .unwrap();

        let file = fx.layout.local_path(ArtifactKind::WebVideo, asset.id, "a-720.mp4");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"video").unwrap();
        renditions::insert_rendition(
            &conn,
            &NewRendition {
                asset_id: asset.id,
                container: ContainerKind::WebVideo,
                resolution: 720,
                fps: Some(30.0),
                storage: StorageKind::FileSystem,
                location: file.to_str().unwrap().to_string(),
                playlist_location: None,
                size_bytes: 5,
                descriptor: None,
            },
        )
        .unwrap();
        (asset, file)
    }

    #[tokio::test]
    async fn test_round_trip_between_storages() {
        let fx = fixture();
        let (asset, file) = asset_with_web_video(&fx);
        let lock = FileLockManager::new().acquire(asset.id).await;

        let report = fx
            .relocator
            .relocate(&lock, &asset, RelocateDirection::ToExternal)
            .await
            .unwrap();
        assert_eq!(report.renditions, 1);
        assert_eq!(report.removed, 1);
        assert!(!file.exists());
        assert!(fx.bucket.join("web-videos/a-720.mp4").exists());

        let stored = renditions::max_quality(&fx.pool.get().unwrap(), asset.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.storage, StorageKind::ObjectStorage);
        assert_eq!(stored.location, "web-videos/a-720.mp4");

        fx.relocator
            .relocate(&lock, &asset, RelocateDirection::ToFileSystem)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), b"video");
        assert!(!fx.bucket.join("web-videos/a-720.mp4").exists());
        assert!(file_removals::list_pending(&fx.pool.get().unwrap(), 10)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_second_run_moves_nothing() {
        let fx = fixture();
        let (asset, _) = asset_with_web_video(&fx);
        let lock = FileLockManager::new().acquire(asset.id).await;

        fx.relocator
            .relocate(&lock, &asset, RelocateDirection::ToExternal)
            .await
            .unwrap();
        let again = fx
            .relocator
            .relocate(&lock, &asset, RelocateDirection::ToExternal)
            .await
            .unwrap();
        assert_eq!(again, RelocationReport::default());
    }

    #[tokio::test]
    async fn test_requires_the_assets_lock() {
        let fx = fixture();
        let (asset, file) = asset_with_web_video(&fx);
        let other = FileLockManager::new().acquire(vodforge_common::AssetId::new()).await;

        assert!(fx
            .relocator
            .relocate(&other, &asset, RelocateDirection::ToExternal)
            .await
            .is_err());
        assert!(file.exists());
    }

    #[test]
    fn test_direction_mapping() {
        assert_eq!(RelocateDirection::ToExternal.target(), StorageKind::ObjectStorage);
        assert_eq!(
            RelocateDirection::ToFileSystem.failure(),
            FailureKind::FileSystem
        );
        assert_eq!(
            serde_json::to_string(&RelocateDirection::ToFileSystem).unwrap(),
            "\"to-file-system\""
        );
    }
}
