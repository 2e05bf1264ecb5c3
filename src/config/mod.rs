mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./vodforge.toml",
        "~/.config/vodforge/config.toml",
        "/etc/vodforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Reject settings the pipeline cannot run with.
pub fn validate_config(config: &Config) -> Result<()> {
    let sb = &config.storyboard;
    if sb.enabled {
        if sb.max_edge == 0 {
            anyhow::bail!("storyboard.max_edge must be at least 1");
        }
        let capacity = u64::from(sb.max_edge) * u64::from(sb.max_edge);
        if u64::from(sb.max_tiles_per_sprite) > capacity {
            anyhow::bail!(
                "storyboard.max_tiles_per_sprite ({}) exceeds max_edge² ({})",
                sb.max_tiles_per_sprite,
                capacity
            );
        }
        if sb.sprite_width == 0 || sb.sprite_height == 0 {
            anyhow::bail!("storyboard sprite dimensions must be non-zero");
        }
    }

    let tc = &config.transcoding;
    if tc.enabled {
        if !tc.web_videos && !tc.hls {
            anyhow::bail!("transcoding is enabled but neither web_videos nor hls is");
        }
        if tc.resolutions.is_empty() && !tc.keep_original_resolution {
            anyhow::bail!("transcoding is enabled but no resolutions are configured");
        }
        if tc.max_fps <= 0.0 {
            anyhow::bail!("transcoding.max_fps must be positive");
        }
    }

    if config.object_storage.enabled && config.object_storage.bucket_dir.is_none() {
        anyhow::bail!("object_storage is enabled but has no bucket_dir");
    }

    if config.jobs.concurrency == 0 {
        anyhow::bail!("jobs.concurrency must be at least 1");
    }

    if config.database.max_retry_attempts == 0 {
        anyhow::bail!("database.max_retry_attempts must be at least 1");
    }

    if let Some(url) = &config.notifications.webhook_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("notifications.webhook_url must be an http(s) URL: {}", url);
        }
    }

    if !config.storage.data_dir.exists() {
        tracing::warn!("Data directory does not exist yet: {:?}", config.storage.data_dir);
    }

    Ok(())
}
