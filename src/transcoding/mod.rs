//! Rendition planning and production.

pub mod orchestrator;
pub mod playlist;
pub mod targets;

pub use orchestrator::{content_descriptor, TranscodingOrchestrator};
pub use targets::{plan_targets, RenditionTarget};
