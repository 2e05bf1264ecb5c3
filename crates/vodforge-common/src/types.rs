//! Core type definitions for assets, renditions and pipeline stages.
//!
//! All enums serialize in kebab-case, which is also the representation stored
//! in the database.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Publication state of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetState {
    /// User-requested edit tasks are pending or running.
    Editing,
    /// Renditions are being produced.
    ToTranscode,
    /// Files are being relocated to external (object) storage.
    ToExternalStorage,
    /// Files are being relocated back to the local file system.
    ToFileSystem,
    /// Visible and announced.
    Published,
    /// Transcoding could not complete.
    TranscodingFailed,
    /// Relocation to external storage could not complete.
    ExternalStorageFailed,
    /// Relocation back to the file system could not complete.
    FileSystemFailed,
    /// A continuously-recorded source is waiting for its first segment.
    WaitingForLive,
    /// A continuously-recorded source has ended.
    LiveEnded,
}

impl AssetState {
    /// States in which files are being relocated between storages.
    pub fn is_move_state(self) -> bool {
        matches!(self, Self::ToExternalStorage | Self::ToFileSystem)
    }

    /// Failure states ("terminal for now").
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::TranscodingFailed | Self::ExternalStorageFailed | Self::FileSystemFailed
        )
    }

    /// States a crash-recovery scan should re-evaluate.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::Editing | Self::ToTranscode | Self::ToExternalStorage | Self::ToFileSystem
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Editing => "editing",
            Self::ToTranscode => "to-transcode",
            Self::ToExternalStorage => "to-external-storage",
            Self::ToFileSystem => "to-file-system",
            Self::Published => "published",
            Self::TranscodingFailed => "transcoding-failed",
            Self::ExternalStorageFailed => "external-storage-failed",
            Self::FileSystemFailed => "file-system-failed",
            Self::WaitingForLive => "waiting-for-live",
            Self::LiveEnded => "live-ended",
        }
    }
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssetState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "editing" => Ok(Self::Editing),
            "to-transcode" => Ok(Self::ToTranscode),
            "to-external-storage" => Ok(Self::ToExternalStorage),
            "to-file-system" => Ok(Self::ToFileSystem),
            "published" => Ok(Self::Published),
            "transcoding-failed" => Ok(Self::TranscodingFailed),
            "external-storage-failed" => Ok(Self::ExternalStorageFailed),
            "file-system-failed" => Ok(Self::FileSystemFailed),
            "waiting-for-live" => Ok(Self::WaitingForLive),
            "live-ended" => Ok(Self::LiveEnded),
            _ => Err(format!("Invalid asset state: {}", s)),
        }
    }
}

/// Kind of failure recorded onto an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Transcoding,
    ExternalStorage,
    FileSystem,
}

impl FailureKind {
    /// The persisted state representing this failure.
    pub fn state(self) -> AssetState {
        match self {
            Self::Transcoding => AssetState::TranscodingFailed,
            Self::ExternalStorage => AssetState::ExternalStorageFailed,
            Self::FileSystem => AssetState::FileSystemFailed,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transcoding => write!(f, "transcoding"),
            Self::ExternalStorage => write!(f, "external-storage"),
            Self::FileSystem => write!(f, "file-system"),
        }
    }
}

/// Output container family of a rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerKind {
    /// Single progressive MP4 file.
    WebVideo,
    /// Fragmented MP4 plus per-resolution playlist for adaptive streaming.
    Hls,
}

impl ContainerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebVideo => "web-video",
            Self::Hls => "hls",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContainerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web-video" => Ok(Self::WebVideo),
            "hls" => Ok(Self::Hls),
            _ => Err(format!("Invalid container kind: {}", s)),
        }
    }
}

/// Where a rendition's bytes currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    FileSystem,
    ObjectStorage,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileSystem => write!(f, "file-system"),
            Self::ObjectStorage => write!(f, "object-storage"),
        }
    }
}

impl std::str::FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file-system" => Ok(Self::FileSystem),
            "object-storage" => Ok(Self::ObjectStorage),
            _ => Err(format!("Invalid storage kind: {}", s)),
        }
    }
}

/// Stage class used for per-asset pending job accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStage {
    Transcode,
    Relocate,
    Storyboard,
    Edit,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transcode => write!(f, "transcode"),
            Self::Relocate => write!(f, "relocate"),
            Self::Storyboard => write!(f, "storyboard"),
            Self::Edit => write!(f, "edit"),
        }
    }
}

impl std::str::FromStr for JobStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcode" => Ok(Self::Transcode),
            "relocate" => Ok(Self::Relocate),
            "storyboard" => Ok(Self::Storyboard),
            "edit" => Ok(Self::Edit),
            _ => Err(format!("Invalid job stage: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [AssetState; 10] = [
        AssetState::Editing,
        AssetState::ToTranscode,
        AssetState::ToExternalStorage,
        AssetState::ToFileSystem,
        AssetState::Published,
        AssetState::TranscodingFailed,
        AssetState::ExternalStorageFailed,
        AssetState::FileSystemFailed,
        AssetState::WaitingForLive,
        AssetState::LiveEnded,
    ];

    #[test]
    fn test_state_string_matches_serde() {
        for state in ALL_STATES {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
            assert_eq!(state.to_string().parse::<AssetState>().unwrap(), state);
        }
    }

    #[test]
    fn test_move_states() {
        let moves: Vec<_> = ALL_STATES.iter().filter(|s| s.is_move_state()).collect();
        assert_eq!(
            moves,
            vec![&AssetState::ToExternalStorage, &AssetState::ToFileSystem]
        );
    }

    #[test]
    fn test_failure_kind_maps_to_failure_state() {
        assert!(FailureKind::Transcoding.state().is_failure());
        assert!(FailureKind::ExternalStorage.state().is_failure());
        assert!(FailureKind::FileSystem.state().is_failure());
        assert!(!AssetState::Published.is_failure());
    }

    #[test]
    fn test_published_is_not_in_progress() {
        assert!(!AssetState::Published.is_in_progress());
        assert!(!AssetState::TranscodingFailed.is_in_progress());
        assert!(AssetState::Editing.is_in_progress());
    }

    #[test]
    fn test_container_kind_ordering() {
        assert!(ContainerKind::WebVideo < ContainerKind::Hls);
        assert_eq!("hls".parse::<ContainerKind>().unwrap(), ContainerKind::Hls);
        assert!("dash".parse::<ContainerKind>().is_err());
    }
}
