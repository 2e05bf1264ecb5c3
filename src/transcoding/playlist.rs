//! HLS master playlist.

use std::path::Path;

use vodforge_common::{ContainerKind, Result};
use vodforge_db::models::Rendition;

use crate::storage::file_name_of;

/// Fallback when the bitrate cannot be estimated.
const DEFAULT_BANDWIDTH: u64 = 800_000;

/// Render a master playlist over every HLS rendition, best first.
///
/// Variant URIs are the per-resolution playlist file names, relative to the
/// master playlist's own directory.
pub fn render_master(renditions: &[Rendition], duration_secs: Option<f64>) -> Result<String> {
    let mut hls: Vec<&Rendition> = renditions
        .iter()
        .filter(|r| r.container == ContainerKind::Hls)
        .collect();
    hls.sort_by(|a, b| b.resolution.cmp(&a.resolution));

    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:6\n");
    for rendition in hls {
        let playlist = rendition
            .playlist_location
            .as_deref()
            .unwrap_or(&rendition.location);

        let mut attrs = format!("BANDWIDTH={}", bandwidth(rendition, duration_secs));
        if rendition.resolution == 0 {
            attrs.push_str(",CODECS=\"mp4a.40.2\"");
        }
        if let Some(fps) = rendition.fps {
            attrs.push_str(&format!(",FRAME-RATE={fps:.3}"));
        }

        out.push_str(&format!("#EXT-X-STREAM-INF:{attrs}\n"));
        out.push_str(file_name_of(playlist)?);
        out.push('\n');
    }
    Ok(out)
}

fn bandwidth(rendition: &Rendition, duration_secs: Option<f64>) -> u64 {
    match duration_secs {
        Some(d) if d > 0.0 => ((rendition.size_bytes as f64 * 8.0) / d).round() as u64,
        _ => DEFAULT_BANDWIDTH,
    }
}

/// Write (or replace) the master playlist at `path`.
pub async fn write_master(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = path.with_extension("m3u8.tmp");
    tokio::fs::write(&staging, contents).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}
