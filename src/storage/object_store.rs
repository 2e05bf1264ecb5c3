//! External object storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use vodforge_common::{Error, Result};

/// Key/value blob storage living outside the local data directory.
///
/// Keys are `/`-separated relative paths such as `web-videos/<file>`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`, replacing any existing object.
    async fn put(&self, local: &Path, key: &str) -> Result<()>;

    /// Download `key` to `dest`.
    async fn get(&self, key: &str, dest: &Path) -> Result<()>;

    /// Delete `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Public URL of `key`.
    fn url(&self, key: &str) -> String;
}

/// An [`ObjectStore`] backed by a plain directory (a mounted bucket, or tests).
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    root: PathBuf,
    base_url: Option<String>,
}

impl DirectoryObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    /// Path of `key` inside the root, rejecting keys that escape it.
    pub fn path_of(&self, key: &str) -> Result<PathBuf> {
        let key = key.trim_start_matches('/');
        if key.is_empty() || key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(Error::storage(format!("invalid object key: {key:?}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for DirectoryObjectStore {
    async fn put(&self, local: &Path, key: &str) -> Result<()> {
        let dest = self.path_of(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Copy to a sibling first so readers never see a partial object.
        let mut partial = dest.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        tokio::fs::copy(local, &partial).await.map_err(|e| {
            Error::storage(format!("failed to upload {} to {}: {}", local.display(), key, e))
        })?;
        tokio::fs::rename(&partial, &dest).await?;
        tracing::debug!(key, "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str, dest: &Path) -> Result<()> {
        let src = self.path_of(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, dest).await.map_err(|e| {
            Error::storage(format!("failed to download {} to {}: {}", key, dest.display(), e))
        })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_of(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn url(&self, key: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}/{}", base, key.trim_start_matches('/')),
            None => format!("file://{}", self.root.join(key).display()),
        }
    }
}
