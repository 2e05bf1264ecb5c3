//! Internal Rust models matching the database schema.
//!
//! This module provides strongly-typed Rust structures that map to database tables.
//! All models use types from vodforge-common where appropriate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vodforge_common::{
    AssetId, AssetState, ContainerKind, JobId, JobStage, RenditionId, StorageKind, UserId,
};

/// Asset model: the unit of pipeline work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub id: AssetId,
    pub owner_id: UserId,
    pub name: String,
    pub state: AssetState,
    pub duration_secs: Option<f64>,
    pub is_live: bool,
    /// Bumped on every state write; guards compare-and-swap updates.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a new asset.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub id: AssetId,
    pub owner_id: UserId,
    pub name: String,
    pub state: AssetState,
    pub duration_secs: Option<f64>,
    pub is_live: bool,
}

impl NewAsset {
    pub fn new(owner_id: UserId, name: impl Into<String>, state: AssetState) -> Self {
        Self {
            id: AssetId::new(),
            owner_id,
            name: name.into(),
            state,
            duration_secs: None,
            is_live: false,
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn live(mut self) -> Self {
        self.is_live = true;
        self
    }
}

/// Identity of a rendition within its asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RenditionKey {
    pub container: ContainerKind,
    pub resolution: u32,
}

/// One produced output file of an asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rendition {
    pub id: RenditionId,
    pub asset_id: AssetId,
    pub container: ContainerKind,
    pub resolution: u32,
    pub fps: Option<f64>,
    pub storage: StorageKind,
    /// File path for the file system, object key for object storage.
    pub location: String,
    /// Per-resolution playlist, HLS only.
    pub playlist_location: Option<String>,
    pub size_bytes: u64,
    /// Content descriptor (SHA-256 of the file), used for peer distribution.
    pub descriptor: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Rendition {
    pub fn key(&self) -> RenditionKey {
        RenditionKey {
            container: self.container,
            resolution: self.resolution,
        }
    }
}

/// Fields for inserting a rendition.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRendition {
    pub asset_id: AssetId,
    pub container: ContainerKind,
    pub resolution: u32,
    pub fps: Option<f64>,
    pub storage: StorageKind,
    pub location: String,
    pub playlist_location: Option<String>,
    pub size_bytes: u64,
    pub descriptor: Option<String>,
}

impl NewRendition {
    pub fn key(&self) -> RenditionKey {
        RenditionKey {
            container: self.container,
            resolution: self.resolution,
        }
    }
}

/// Outstanding jobs of one stage for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingJobCount {
    pub asset_id: AssetId,
    pub stage: JobStage,
    pub pending: u32,
}

/// Storyboard sprite-sheet model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Storyboard {
    pub asset_id: AssetId,
    pub storage: StorageKind,
    pub location: String,
    pub sprite_width: u32,
    pub sprite_height: u32,
    pub grid_width: u32,
    pub grid_height: u32,
    pub tile_interval_secs: f64,
    pub created_at: DateTime<Utc>,
}

/// A superseded file scheduled for deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRemoval {
    pub id: i64,
    pub asset_id: AssetId,
    pub storage: StorageKind,
    pub location: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

/// Lifecycle status of a persisted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Persisted background job.
///
/// `payload` is the serialized job description; its shape is owned by the
/// job queue, this crate stores it opaquely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub kind: String,
    pub asset_id: Option<AssetId>,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub worker: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
