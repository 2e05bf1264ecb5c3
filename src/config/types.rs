use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vodforge_av::FfmpegSettings;
use vodforge_db::transaction::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub transcoding: TranscodingConfig,

    #[serde(default)]
    pub object_storage: ObjectStorageConfig,

    #[serde(default)]
    pub storyboard: StoryboardConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// SQLite file location.
    pub fn database_path(&self) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            self.storage.data_dir.join(&self.database.path)
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.database.max_retry_attempts,
            Duration::from_millis(self.database.retry_backoff_ms),
        )
    }

    pub fn ffmpeg_settings(&self) -> FfmpegSettings {
        FfmpegSettings {
            preset: self.transcoding.preset.clone(),
            crf: self.transcoding.crf,
            threads: self.transcoding.threads,
            timeout: Duration::from_secs(self.transcoding.timeout_secs),
            ..FfmpegSettings::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.jobs.poll_interval_ms)
    }
}

/// Where files live. Relative directories are resolved against `data_dir`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    #[serde(default = "default_web_videos_dir")]
    pub web_videos_dir: PathBuf,

    #[serde(default = "default_hls_dir")]
    pub hls_dir: PathBuf,

    #[serde(default = "default_storyboards_dir")]
    pub storyboards_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/vodforge")
}
fn default_tmp_dir() -> PathBuf {
    PathBuf::from("tmp")
}
fn default_web_videos_dir() -> PathBuf {
    PathBuf::from("web-videos")
}
fn default_hls_dir() -> PathBuf {
    PathBuf::from("streaming-playlists/hls")
}
fn default_storyboards_dir() -> PathBuf {
    PathBuf::from("storyboards")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            tmp_dir: default_tmp_dir(),
            web_videos_dir: default_web_videos_dir(),
            hls_dir: default_hls_dir(),
            storyboards_dir: default_storyboards_dir(),
        }
    }
}

impl StorageConfig {
    /// Storage rooted at `data_dir` with every other directory at its default.
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.data_dir.join(dir)
        }
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.resolve(&self.tmp_dir)
    }

    pub fn web_videos_dir(&self) -> PathBuf {
        self.resolve(&self.web_videos_dir)
    }

    pub fn hls_dir(&self) -> PathBuf {
        self.resolve(&self.hls_dir)
    }

    pub fn storyboards_dir(&self) -> PathBuf {
        self.resolve(&self.storyboards_dir)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite file, relative to `storage.data_dir` unless absolute.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("vodforge.db")
}
fn default_max_retry_attempts() -> u32 {
    5
}
fn default_retry_backoff_ms() -> u64 {
    25
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Target resolutions (short side, pixels). 0 means audio only.
    #[serde(default = "default_resolutions")]
    pub resolutions: Vec<u32>,

    /// Produce single-file renditions.
    #[serde(default = "default_true")]
    pub web_videos: bool,

    /// Produce adaptive-streaming renditions.
    #[serde(default)]
    pub hls: bool,

    #[serde(default = "default_hls_segment_secs")]
    pub hls_segment_secs: u32,

    #[serde(default = "default_max_fps")]
    pub max_fps: f64,

    /// Also produce a rendition at the source's own resolution.
    #[serde(default)]
    pub keep_original_resolution: bool,

    /// x264 preset handed to the encoder.
    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default = "default_crf")]
    pub crf: u32,

    /// Encoder threads per job; 0 lets the encoder decide.
    #[serde(default)]
    pub threads: u32,

    #[serde(default = "default_encode_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_resolutions() -> Vec<u32> {
    vec![240, 480, 720, 1080]
}
fn default_hls_segment_secs() -> u32 {
    4
}
fn default_max_fps() -> f64 {
    60.0
}
fn default_preset() -> String {
    "veryfast".to_string()
}
fn default_crf() -> u32 {
    23
}
fn default_encode_timeout() -> u64 {
    4 * 3600
}

impl Default for TranscodingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resolutions: default_resolutions(),
            web_videos: true,
            hls: false,
            hls_segment_secs: default_hls_segment_secs(),
            max_fps: default_max_fps(),
            keep_original_resolution: false,
            preset: default_preset(),
            crf: default_crf(),
            threads: 0,
            timeout_secs: default_encode_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ObjectStorageConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Directory standing in for the bucket.
    #[serde(default)]
    pub bucket_dir: Option<PathBuf>,

    /// Public URL prefix for uploaded objects.
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoryboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sprite_width")]
    pub sprite_width: u32,

    #[serde(default = "default_sprite_height")]
    pub sprite_height: u32,

    #[serde(default = "default_max_tiles")]
    pub max_tiles_per_sprite: u32,

    /// Maximum number of sprites along either side of the grid.
    #[serde(default = "default_max_edge")]
    pub max_edge: u32,
}

fn default_sprite_width() -> u32 {
    192
}
fn default_sprite_height() -> u32 {
    108
}
fn default_max_tiles() -> u32 {
    100
}
fn default_max_edge() -> u32 {
    10
}

impl Default for StoryboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sprite_width: default_sprite_width(),
            sprite_height: default_sprite_height(),
            max_tiles_per_sprite: default_max_tiles(),
            max_edge: default_max_edge(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Number of worker tasks.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Finished jobs older than this are pruned at startup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_concurrency() -> usize {
    2
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_retention_days() -> u32 {
    7
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationsConfig {
    /// POST pipeline events here as JSON.
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_webhook_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Per-user storage budget in bytes. Absent means unlimited.
    #[serde(default)]
    pub default_user_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}
