//! Storyboard rendering.
//!
//! Renders the sprite sheet from a local source under the asset lock, then
//! records it and schedules the superseded sheet for removal.

use std::path::Path;
use std::sync::Arc;

use vodforge_av::{move_file, EncodeJob, Encoder, Workspace};
use vodforge_common::{Result, StorageKind};
use vodforge_db::models::{Asset, Storyboard};
use vodforge_db::pool::DbPool;
use vodforge_db::queries::storyboards;
use vodforge_db::transaction::{with_retry, RetryPolicy};

use super::grid::{layout, tile_interval, total_tiles};
use crate::config::StoryboardConfig;
use crate::locks::AssetLock;
use crate::storage::{
    execute_removals, location_of, remove_local, removals, ArtifactKind, ObjectStore,
    StorageLayout,
};

/// Renders and records sprite-sheet storyboards.
pub struct StoryboardGenerator {
    pool: DbPool,
    retry: RetryPolicy,
    encoder: Arc<dyn Encoder>,
    layout: StorageLayout,
    object_store: Option<Arc<dyn ObjectStore>>,
    config: StoryboardConfig,
}

impl StoryboardGenerator {
    pub fn new(
        pool: DbPool,
        retry: RetryPolicy,
        encoder: Arc<dyn Encoder>,
        layout: StorageLayout,
        object_store: Option<Arc<dyn ObjectStore>>,
        config: StoryboardConfig,
    ) -> Self {
        Self {
            pool,
            retry,
            encoder,
            layout,
            object_store,
            config,
        }
    }

    /// Render a storyboard of `source` and make it the asset's storyboard.
    ///
    /// Returns `None` without touching anything when the asset has no
    /// usable duration.
    pub async fn generate(
        &self,
        lock: &AssetLock,
        asset: &Asset,
        source: &Path,
    ) -> Result<Option<Storyboard>> {
        lock.covers(asset.id)?;

        let duration = asset.duration_secs.unwrap_or(0.0);
        let tiles = total_tiles(duration, self.config.max_tiles_per_sprite);
        if tiles == 0 {
            tracing::debug!(asset_id = %asset.id, "No duration, skipping storyboard");
            return Ok(None);
        }
        let grid = layout(tiles, self.config.max_edge)?;
        let interval = tile_interval(duration, grid.tiles());

        let workspace = Workspace::new_in(self.layout.tmp_dir())?;
        let name = format!("{}-storyboard.jpg", uuid::Uuid::new_v4());
        let rendered = workspace.temp_file(&name);
        self.encoder
            .encode(&EncodeJob::Storyboard {
                input: source.to_path_buf(),
                output: rendered.clone(),
                interval_secs: interval,
                sprite_width: self.config.sprite_width,
                sprite_height: self.config.sprite_height,
                columns: grid.width,
                rows: grid.height,
            })
            .await?;

        let dest = self.layout.local_path(ArtifactKind::Storyboard, asset.id, &name);
        move_file(&rendered, &dest)?;

        let storyboard = Storyboard {
            asset_id: asset.id,
            storage: StorageKind::FileSystem,
            location: location_of(&dest)?,
            sprite_width: self.config.sprite_width,
            sprite_height: self.config.sprite_height,
            grid_width: grid.width,
            grid_height: grid.height,
            tile_interval_secs: f64::from(interval),
            created_at: chrono::Utc::now(),
        };

        let recorded = with_retry(&self.pool, &self.retry, |tx| {
            let previous = storyboards::upsert_storyboard(tx, &storyboard)?;
            previous
                .map(|old| removals::schedule(tx, asset.id, old.storage, &old.location))
                .transpose()
        })
        .await;
        let superseded = match recorded {
            Ok(superseded) => superseded,
            Err(e) => {
                if let Err(cleanup) = remove_local(&dest).await {
                    tracing::warn!(path = %dest.display(), "Failed to clean up storyboard: {}", cleanup);
                }
                return Err(e);
            }
        };
        if let Some(old) = superseded {
            execute_removals(&self.pool, self.object_store.as_ref(), &[old]).await;
        }

        tracing::info!(
            asset_id = %asset.id,
            columns = grid.width,
            rows = grid.height,
            interval_secs = interval,
            "Storyboard generated"
        );
        Ok(Some(storyboard))
    }
}
