//! # vodforge-av
//!
//! Media encoding for the vodforge pipeline.
//!
//! This crate provides:
//! - The [`Encoder`] trait, the seam between the pipeline and whatever
//!   actually encodes video
//! - [`FfmpegEncoder`], which drives the ffmpeg and ffprobe CLI tools
//! - Scratch [`Workspace`]s that clean themselves up on every exit path
//! - External tool detection
//!
//! ## Example
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use vodforge_av::{EncodeJob, Encoder, FfmpegEncoder, FfmpegSettings, TranscodeJob, Workspace};
//!
//! # async fn example() -> vodforge_av::Result<()> {
//! let encoder = FfmpegEncoder::discover(None, None, FfmpegSettings::default())?;
//! let workspace = Workspace::new_in("/var/lib/vodforge/tmp")?;
//! let job = EncodeJob::Transcode(TranscodeJob {
//!     input: PathBuf::from("/uploads/source.mkv"),
//!     output: workspace.temp_file("720.mp4"),
//!     resolution: 720,
//!     fps: None,
//!     hls: None,
//! });
//! encoder.encode(&job).await?;
//! let info = encoder.probe(job.output()).await?;
//! println!("{:?}s", info.duration_secs);
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod encoder;
mod error;
pub mod ffmpeg;
pub mod probe;
pub mod tools;
pub mod workspace;

// Re-exports
pub use command::{ToolCommand, ToolOutput};
pub use encoder::{EncodeJob, Encoder, HlsOutput, OverlayPlacement, TranscodeJob};
pub use error::{Error, Result};
pub use ffmpeg::{FfmpegEncoder, FfmpegSettings};
pub use probe::ProbeInfo;
pub use tools::{check_tool, check_tools, require_tool, ToolInfo};
pub use workspace::{move_file, Workspace};
