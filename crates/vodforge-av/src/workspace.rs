//! Scratch directories for encoder runs.
//!
//! A [`Workspace`] is a uniquely-named temporary directory under a configured
//! parent. Everything written inside it disappears when the workspace is
//! dropped, whether the run succeeded or not; results are moved out with
//! [`move_file`] before that happens.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::{Error, Result};

/// Temporary directory for intermediate files.
///
/// # Example
///
/// ```no_run
/// use vodforge_av::workspace::{move_file, Workspace};
///
/// let workspace = Workspace::new_in("/var/lib/vodforge/tmp")?;
/// let output = workspace.temp_file("output.mp4");
/// // ... encoder writes `output` ...
/// move_file(&output, std::path::Path::new("/var/lib/vodforge/videos/a.mp4"))?;
/// # Ok::<(), vodforge_av::Error>(())
/// ```
#[derive(Debug)]
pub struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    /// Create a workspace under `parent`, creating `parent` if needed.
    pub fn new_in<P: AsRef<Path>>(parent: P) -> Result<Self> {
        let parent = parent.as_ref();
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::Workspace(format!("failed to create {}: {}", parent.display(), e))
        })?;

        let temp_dir = tempfile::Builder::new()
            .prefix("vodforge-")
            .tempdir_in(parent)
            .map_err(|e| Error::Workspace(format!("failed to create temp dir: {}", e)))?;

        Ok(Self { temp_dir })
    }

    /// Path of the workspace directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path for a named file inside the workspace. Nothing is created.
    pub fn temp_file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Copy an external file into the workspace under `name`.
    ///
    /// The copy is owned by the workspace and removed with it, so callers
    /// can hand it to an encoder without touching the original.
    pub fn import(&self, source: &Path, name: &str) -> Result<PathBuf> {
        if !source.exists() {
            return Err(Error::file_not_found(source));
        }
        let dest = self.temp_file(name);
        std::fs::copy(source, &dest)?;
        Ok(dest)
    }

    /// Delete a file inside the workspace early. Missing files are fine.
    pub fn discard(&self, path: &Path) -> Result<()> {
        if !path.starts_with(self.path()) {
            return Err(Error::Workspace(format!(
                "refusing to delete {} outside the workspace",
                path.display()
            )));
        }
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Move a file to `dest`, overwriting it and creating parent directories.
///
/// Tries a rename first (same filesystem) and falls back to copy + remove.
pub fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if !src.exists() {
        return Err(Error::file_not_found(src));
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if std::fs::rename(src, dest).is_err() {
        std::fs::copy(src, dest).map_err(|e| {
            Error::Workspace(format!(
                "failed to copy {} to {}: {}",
                src.display(),
                dest.display(),
                e
            ))
        })?;
        if let Err(e) = std::fs::remove_file(src) {
            tracing::debug!(path = %src.display(), error = %e, "Could not remove moved source");
        }
    }

    Ok(())
}
