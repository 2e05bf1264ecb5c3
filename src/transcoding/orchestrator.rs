//! Producing and installing renditions.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use vodforge_av::{move_file, EncodeJob, Encoder, HlsOutput, TranscodeJob, Workspace};
use vodforge_common::{ContainerKind, Error, Result, StorageKind};
use vodforge_db::models::{Asset, NewRendition, Rendition};
use vodforge_db::pool::{get_conn, DbPool};
use vodforge_db::queries::{assets, renditions};
use vodforge_db::transaction::{with_retry, RetryPolicy};

use super::playlist;
use super::RenditionTarget;
use crate::locks::AssetLock;
use crate::storage::{
    execute_removals, location_of, removals, ArtifactKind, ObjectStore, StorageLayout,
};

/// Encodes renditions and swaps them into place.
///
/// Callers hold the asset's lock; nothing here acquires it, so one lock can
/// cover several renditions.
pub struct TranscodingOrchestrator {
    pool: DbPool,
    retry: RetryPolicy,
    encoder: Arc<dyn Encoder>,
    layout: StorageLayout,
    object_store: Option<Arc<dyn ObjectStore>>,
    hls_segment_secs: u32,
}

/// A media file ready to become a rendition.
struct Produced<'a> {
    media: &'a Path,
    playlist: Option<&'a Path>,
}

impl TranscodingOrchestrator {
    pub fn new(
        pool: DbPool,
        retry: RetryPolicy,
        encoder: Arc<dyn Encoder>,
        layout: StorageLayout,
        object_store: Option<Arc<dyn ObjectStore>>,
        hls_segment_secs: u32,
    ) -> Self {
        Self {
            pool,
            retry,
            encoder,
            layout,
            object_store,
            hls_segment_secs,
        }
    }

    /// Encode `source` to `target` and make the result the asset's only
    /// rendition for that key.
    pub async fn produce_rendition(
        &self,
        lock: &AssetLock,
        asset: &Asset,
        source: &Path,
        target: &RenditionTarget,
    ) -> Result<Rendition> {
        lock.covers(asset.id)?;

        let workspace = Workspace::new_in(self.layout.tmp_dir())?;
        let stem = format!("{}-{}", uuid::Uuid::new_v4(), target.resolution);
        let (media, hls) = match target.container {
            ContainerKind::WebVideo => (workspace.temp_file(&format!("{stem}.mp4")), None),
            ContainerKind::Hls => (
                workspace.temp_file(&format!("{stem}-fragmented.mp4")),
                Some(HlsOutput {
                    playlist: workspace.temp_file(&format!("{stem}.m3u8")),
                    segment_secs: self.hls_segment_secs,
                }),
            ),
        };

        let job = EncodeJob::Transcode(TranscodeJob {
            input: source.to_path_buf(),
            output: media.clone(),
            resolution: target.resolution,
            fps: target.fps,
            hls: hls.clone(),
        });

        tracing::info!(
            asset_id = %asset.id,
            container = %target.container,
            resolution = target.resolution,
            "Transcoding rendition"
        );
        self.encoder.encode(&job).await.map_err(|e| {
            tracing::error!(asset_id = %asset.id, job = job.name(), "Encoder failed: {}", e);
            Error::from(e)
        })?;

        let produced = Produced {
            media: &media,
            playlist: hls.as_ref().map(|h| h.playlist.as_path()),
        };
        self.install(
            asset,
            target.container,
            Some(target.resolution),
            target.fps,
            produced,
        )
        .await
    }

    /// Install an already-encoded file as the rendition for its probed
    /// resolution, e.g. the output of an edit.
    pub async fn adopt_file(
        &self,
        lock: &AssetLock,
        asset: &Asset,
        file: &Path,
        container: ContainerKind,
    ) -> Result<Rendition> {
        lock.covers(asset.id)?;
        self.install(
            asset,
            container,
            None,
            None,
            Produced {
                media: file,
                playlist: None,
            },
        )
        .await
    }

    async fn install(
        &self,
        asset: &Asset,
        container: ContainerKind,
        resolution: Option<u32>,
        fps: Option<f64>,
        produced: Produced<'_>,
    ) -> Result<Rendition> {
        let info = self.encoder.probe(produced.media).await?;
        let kind = ArtifactKind::from(container);
        let media_name = file_name(produced.media)?;

        let final_media = self.layout.local_path(kind, asset.id, &media_name);
        move_file(produced.media, &final_media)?;

        let mut moved = vec![final_media.clone()];
        let final_playlist = match produced.playlist {
            Some(playlist) => {
                let dest = self.layout.local_path(kind, asset.id, &file_name(playlist)?);
                if let Err(e) = move_file(playlist, &dest) {
                    discard_all(&moved).await;
                    return Err(e.into());
                }
                moved.push(dest.clone());
                Some(dest)
            }
            None => None,
        };

        let key = (container, resolution.unwrap_or_else(|| info.resolution()));
        let recorded = self
            .record(asset, key, fps.or(info.fps), &info, &final_media, final_playlist.as_deref())
            .await;
        let (rendition, superseded) = match recorded {
            Ok(r) => r,
            Err(e) => {
                discard_all(&moved).await;
                return Err(e);
            }
        };

        let removed =
            execute_removals(&self.pool, self.object_store.as_ref(), &superseded).await;
        tracing::info!(
            asset_id = %asset.id,
            rendition_id = %rendition.id,
            container = %container,
            resolution = rendition.resolution,
            superseded_files = superseded.len(),
            removed,
            "Rendition installed"
        );

        if container == ContainerKind::Hls {
            if let Err(e) = self.refresh_master_playlist(asset).await {
                tracing::warn!(asset_id = %asset.id, "Failed to rewrite master playlist: {}", e);
            }
        }
        Ok(rendition)
    }

    async fn record(
        &self,
        asset: &Asset,
        (container, resolution): (ContainerKind, u32),
        fps: Option<f64>,
        info: &vodforge_av::ProbeInfo,
        media: &Path,
        playlist: Option<&Path>,
    ) -> Result<(Rendition, Vec<removals::ScheduledRemoval>)> {
        let descriptor = content_descriptor(media).await?;
        let size_bytes = tokio::fs::metadata(media).await?.len();

        let new = NewRendition {
            asset_id: asset.id,
            container,
            resolution,
            fps: if resolution > 0 && info.has_video() { fps } else { None },
            storage: StorageKind::FileSystem,
            location: location_of(media)?,
            playlist_location: playlist.map(location_of).transpose()?,
            size_bytes,
            descriptor: Some(descriptor),
        };

        with_retry(&self.pool, &self.retry, |tx| {
            let replaced = renditions::replace_rendition(tx, &new)?;
            let mut scheduled = Vec::new();
            if let Some(old) = &replaced.superseded {
                scheduled.push(removals::schedule(tx, asset.id, old.storage, &old.location)?);
                if let Some(list) = &old.playlist_location {
                    scheduled.push(removals::schedule(tx, asset.id, old.storage, list)?);
                }
            }
            if let Some(duration) = info.duration_secs {
                assets::set_duration_if_unset(tx, asset.id, duration)?;
            }
            Ok((replaced.current, scheduled))
        })
        .await
    }

    /// Rewrite `master.m3u8` from the asset's current HLS renditions.
    pub async fn refresh_master_playlist(&self, asset: &Asset) -> Result<()> {
        let (all, duration) = {
            let conn = get_conn(&self.pool)?;
            let all = renditions::list_for_asset(&conn, asset.id)?;
            let duration = assets::get_asset(&conn, asset.id)?.and_then(|a| a.duration_secs);
            (all, duration)
        };
        let local_hls: Vec<Rendition> = all
            .into_iter()
            .filter(|r| r.container == ContainerKind::Hls && r.storage == StorageKind::FileSystem)
            .collect();
        if local_hls.is_empty() {
            return Ok(());
        }

        let contents = playlist::render_master(&local_hls, duration)?;
        playlist::write_master(&self.layout.master_playlist(asset.id), &contents).await
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::storage(format!("no file name in {}", path.display())))
}

async fn discard_all(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = crate::storage::remove_local(path).await {
            tracing::warn!(path = %path.display(), "Failed to clean up: {}", e);
        }
    }
}

/// SHA-256 of a file, hex encoded.
pub async fn content_descriptor(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        hasher.flush()?;
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| Error::internal(format!("hashing task failed: {e}")))?
}
