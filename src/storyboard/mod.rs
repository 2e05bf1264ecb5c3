//! Storyboards: sprite sheets of evenly spaced preview frames.

pub mod generate;
pub mod grid;

pub use generate::StoryboardGenerator;
pub use grid::{layout, tile_interval, total_tiles, GridLayout};
