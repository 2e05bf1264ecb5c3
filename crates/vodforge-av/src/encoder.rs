//! The encoder seam.
//!
//! Everything the pipeline asks of a media encoder is expressed as an
//! [`EncodeJob`]. Implementations write exactly the output paths named in the
//! job and nothing else; moving results into place is the caller's concern.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::probe::ProbeInfo;
use crate::Result;

/// Produce one rendition of a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeJob {
    pub input: PathBuf,
    /// Media file to write (fragmented MP4 for HLS).
    pub output: PathBuf,
    /// Shorter side in pixels; 0 produces an audio-only file.
    pub resolution: u32,
    pub fps: Option<f64>,
    pub hls: Option<HlsOutput>,
}

/// HLS packaging options for a [`TranscodeJob`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HlsOutput {
    /// Per-resolution media playlist to write next to the media file.
    pub playlist: PathBuf,
    pub segment_secs: u32,
}

/// Overlay placement, each as a fraction of the base video's size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayPlacement {
    /// Overlay height relative to the video height.
    pub size_ratio: f64,
    /// Gap to the right edge relative to the video width.
    pub horizontal_margin_ratio: f64,
    /// Gap to the top edge relative to the video height.
    pub vertical_margin_ratio: f64,
}

impl Default for OverlayPlacement {
    fn default() -> Self {
        Self {
            size_ratio: 0.1,
            horizontal_margin_ratio: 0.05,
            vertical_margin_ratio: 0.05,
        }
    }
}

/// A unit of work for an [`Encoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum EncodeJob {
    Transcode(TranscodeJob),
    /// Keep only `[start, end)` seconds; either bound may be open.
    Cut {
        input: PathBuf,
        output: PathBuf,
        start: Option<f64>,
        end: Option<f64>,
    },
    /// Play `first` then `second`, both scaled to `width`x`height`.
    Concat {
        first: PathBuf,
        second: PathBuf,
        output: PathBuf,
        width: u32,
        height: u32,
    },
    /// Burn an image over the top-right corner.
    Overlay {
        input: PathBuf,
        overlay: PathBuf,
        output: PathBuf,
        placement: OverlayPlacement,
    },
    /// Sprite sheet: one frame every `interval_secs`, tiled `columns`x`rows`.
    Storyboard {
        input: PathBuf,
        output: PathBuf,
        interval_secs: u32,
        sprite_width: u32,
        sprite_height: u32,
        columns: u32,
        rows: u32,
    },
}

impl EncodeJob {
    /// Short name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transcode(job) if job.hls.is_some() => "transcode-hls",
            Self::Transcode(_) => "transcode",
            Self::Cut { .. } => "cut",
            Self::Concat { .. } => "concat",
            Self::Overlay { .. } => "overlay",
            Self::Storyboard { .. } => "storyboard",
        }
    }

    /// The primary file this job writes.
    pub fn output(&self) -> &Path {
        match self {
            Self::Transcode(job) => &job.output,
            Self::Cut { output, .. }
            | Self::Concat { output, .. }
            | Self::Overlay { output, .. }
            | Self::Storyboard { output, .. } => output,
        }
    }
}

/// Media encoder and prober.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Run a job to completion, leaving its outputs on disk.
    async fn encode(&self, job: &EncodeJob) -> Result<()>;

    /// Inspect a media file.
    async fn probe(&self, path: &Path) -> Result<ProbeInfo>;
}
