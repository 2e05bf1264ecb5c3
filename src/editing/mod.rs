//! User-requested edits of an asset's video.

pub mod pipeline;
pub mod tasks;

pub use pipeline::{EditedFile, EditingPipeline};
pub use tasks::{parse_tasks, EditTask, RawEditTask};
