//! Vodforge - unattended publication pipeline for uploaded video.
//!
//! An uploaded asset moves through transcoding, optional relocation to
//! object storage and publication, driven by persisted jobs. The
//! [`Pipeline`] ties the components together; the `vodforge` binary runs its
//! workers.

pub mod config;
pub mod editing;
pub mod jobs;
pub mod locks;
pub mod notifications;
pub mod pipeline;
pub mod publication;
pub mod quota;
pub mod storage;
pub mod storyboard;
pub mod transcoding;

pub use jobs::{JobPayload, JobQueue, JobRun};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use publication::{AdvanceContext, AdvanceOutcome};
