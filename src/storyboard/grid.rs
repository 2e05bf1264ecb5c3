//! Sprite grid planning.
//!
//! Pure arithmetic: how many preview tiles a storyboard gets and how they are
//! arranged in a sheet no wider or taller than `max_edge` tiles.

use serde::{Deserialize, Serialize};
use vodforge_common::{Error, Result};

/// Columns and rows of a sprite sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
}

impl GridLayout {
    pub fn tiles(&self) -> u32 {
        self.width * self.height
    }
}

/// One tile per started second, capped at `max_tiles_per_sprite`.
///
/// Returns 0 for a missing or non-positive duration; callers skip generation
/// in that case.
pub fn total_tiles(duration_secs: f64, max_tiles_per_sprite: u32) -> u32 {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return 0;
    }
    let wanted = duration_secs.ceil();
    if wanted >= f64::from(max_tiles_per_sprite) {
        max_tiles_per_sprite
    } else {
        wanted as u32
    }
}

/// Arrange `total_tiles` into a grid with both sides at most `max_edge`.
///
/// Counts that fit in one row stay a single row. Otherwise the first factor
/// pair found scanning rows ascending, then columns ascending from the row
/// count, wins. A count with no such pair is reduced to the next smaller
/// count that has one, so the grid never holds more tiles than asked for.
pub fn layout(total_tiles: u32, max_edge: u32) -> Result<GridLayout> {
    if total_tiles == 0 {
        return Err(Error::invalid_input("cannot lay out zero tiles"));
    }
    if max_edge == 0 {
        return Err(Error::invalid_config("sprite grid max edge is zero"));
    }

    if let Some(grid) = exact_fit(total_tiles, max_edge) {
        return Ok(grid);
    }

    (2..total_tiles)
        .rev()
        .find_map(|count| exact_fit(count, max_edge))
        .ok_or_else(|| {
            Error::invalid_config(format!(
                "no sprite grid of at most {max_edge}x{max_edge} fits {total_tiles} tiles"
            ))
        })
}

fn exact_fit(total_tiles: u32, max_edge: u32) -> Option<GridLayout> {
    if total_tiles <= max_edge {
        return Some(GridLayout {
            width: total_tiles,
            height: 1,
        });
    }

    for i in 1..=max_edge {
        for j in i..=max_edge {
            if u64::from(i) * u64::from(j) == u64::from(total_tiles) {
                return Some(GridLayout {
                    width: j,
                    height: i,
                });
            }
        }
    }
    None
}

/// Seconds between two tiles, never below one.
pub fn tile_interval(duration_secs: f64, tiles: u32) -> u32 {
    if tiles == 0 || !duration_secs.is_finite() || duration_secs <= 0.0 {
        return 1;
    }
    let interval = (duration_secs / f64::from(tiles)).round();
    if interval < 1.0 {
        1
    } else {
        interval as u32
    }
}
