//! Where asset files live, locally and in object storage.

pub mod object_store;
pub mod relocation;
pub mod removals;

pub use object_store::{DirectoryObjectStore, ObjectStore};
pub use relocation::{RelocateDirection, RelocationReport, Relocator};
pub use removals::{execute_removals, purge_scheduled_removals, ScheduledRemoval};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vodforge_av::Workspace;
use vodforge_common::{AssetId, ContainerKind, Error, Result, StorageKind};
use vodforge_db::models::Rendition;

use crate::config::StorageConfig;

/// Families of files an asset owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    WebVideo,
    Hls,
    Storyboard,
}

impl From<ContainerKind> for ArtifactKind {
    fn from(container: ContainerKind) -> Self {
        match container {
            ContainerKind::WebVideo => Self::WebVideo,
            ContainerKind::Hls => Self::Hls,
        }
    }
}

/// Maps artifact file names to local paths and object keys.
///
/// Both sides share a shape: web videos and storyboards are flat, HLS files
/// are grouped per asset so relative playlist references keep working after
/// a move.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    config: StorageConfig,
}

impl StorageLayout {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.config.tmp_dir()
    }

    pub fn local_dir(&self, kind: ArtifactKind, asset_id: AssetId) -> PathBuf {
        match kind {
            ArtifactKind::WebVideo => self.config.web_videos_dir(),
            ArtifactKind::Hls => self.config.hls_dir().join(asset_id.to_string()),
            ArtifactKind::Storyboard => self.config.storyboards_dir(),
        }
    }

    pub fn local_path(&self, kind: ArtifactKind, asset_id: AssetId, file_name: &str) -> PathBuf {
        self.local_dir(kind, asset_id).join(file_name)
    }

    pub fn object_key(&self, kind: ArtifactKind, asset_id: AssetId, file_name: &str) -> String {
        match kind {
            ArtifactKind::WebVideo => format!("web-videos/{file_name}"),
            ArtifactKind::Hls => format!("hls/{asset_id}/{file_name}"),
            ArtifactKind::Storyboard => format!("storyboards/{file_name}"),
        }
    }

    /// HLS master playlist of an asset.
    pub fn master_playlist(&self, asset_id: AssetId) -> PathBuf {
        self.local_path(ArtifactKind::Hls, asset_id, MASTER_PLAYLIST)
    }
}

pub const MASTER_PLAYLIST: &str = "master.m3u8";

/// Last path segment of a file path or object key.
pub fn file_name_of(location: &str) -> Result<&str> {
    Path::new(location)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::storage(format!("location has no file name: {location:?}")))
}

/// A rendition's media file, readable on the local file system.
///
/// Renditions in object storage are downloaded into a private workspace that
/// disappears with this value.
#[derive(Debug)]
pub struct LocalSource {
    path: PathBuf,
    workspace: Option<Workspace>,
}

impl LocalSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file is a temporary download rather than the stored file.
    pub fn is_download(&self) -> bool {
        self.workspace.is_some()
    }
}

/// Make `rendition`'s media file available locally.
pub async fn materialize(
    rendition: &Rendition,
    object_store: Option<&Arc<dyn ObjectStore>>,
    tmp_dir: &Path,
) -> Result<LocalSource> {
    match rendition.storage {
        StorageKind::FileSystem => Ok(LocalSource {
            path: PathBuf::from(&rendition.location),
            workspace: None,
        }),
        StorageKind::ObjectStorage => {
            let store = object_store
                .ok_or_else(|| Error::storage("object storage is not configured"))?;
            let workspace = Workspace::new_in(tmp_dir)?;
            let path = workspace.temp_file(file_name_of(&rendition.location)?);
            store.get(&rendition.location, &path).await?;
            tracing::debug!(rendition_id = %rendition.id, key = %rendition.location, "Downloaded rendition");
            Ok(LocalSource {
                path,
                workspace: Some(workspace),
            })
        }
    }
}

/// A local path as a stored location string.
pub fn location_of(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| Error::storage(format!("non UTF-8 path {}", path.display())))
}

/// Delete a local file, treating "already gone" as success.
pub async fn remove_local(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
