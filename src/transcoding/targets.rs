use serde::{Deserialize, Serialize};
use vodforge_common::ContainerKind;

use crate::config::TranscodingConfig;

/// One rendition to produce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenditionTarget {
    pub container: ContainerKind,
    /// Shorter side in pixels; 0 is audio only.
    pub resolution: u32,
    pub fps: Option<f64>,
}

/// Renditions to produce from a source of the given resolution.
///
/// Configured resolutions above the source are skipped; the source
/// resolution itself is added when configured or when nothing else is left.
/// Ordered by container, then resolution descending, so the best rendition
/// of each container is produced first.
pub fn plan_targets(
    config: &TranscodingConfig,
    source_resolution: u32,
    source_fps: Option<f64>,
) -> Vec<RenditionTarget> {
    let mut resolutions: Vec<u32> = config
        .resolutions
        .iter()
        .copied()
        .filter(|&r| r <= source_resolution)
        .collect();

    let has_video = resolutions.iter().any(|&r| r > 0);
    if config.keep_original_resolution || !has_video {
        resolutions.push(source_resolution);
    }
    resolutions.sort_unstable_by(|a, b| b.cmp(a));
    resolutions.dedup();

    let fps = source_fps.map(|f| f.min(config.max_fps));

    let mut containers = Vec::with_capacity(2);
    if config.web_videos {
        containers.push(ContainerKind::WebVideo);
    }
    if config.hls {
        containers.push(ContainerKind::Hls);
    }

    containers
        .into_iter()
        .flat_map(|container| {
            resolutions.iter().map(move |&resolution| RenditionTarget {
                container,
                resolution,
                fps: if resolution == 0 { None } else { fps },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(resolutions: &[u32]) -> TranscodingConfig {
        TranscodingConfig {
            resolutions: resolutions.to_vec(),
            ..TranscodingConfig::default()
        }
    }

    fn summary(targets: &[RenditionTarget]) -> Vec<(ContainerKind, u32)> {
        targets.iter().map(|t| (t.container, t.resolution)).collect()
    }

    #[test]
    fn test_skips_upscaling() {
        let targets = plan_targets(&config(&[240, 480, 720, 1080]), 720, Some(30.0));
        assert_eq!(
            summary(&targets),
            vec![
                (ContainerKind::WebVideo, 720),
                (ContainerKind::WebVideo, 480),
                (ContainerKind::WebVideo, 240)
            ]
        );
    }

    #[test]
    fn test_small_source_keeps_own_resolution() {
        let targets = plan_targets(&config(&[480, 720]), 360, None);
        assert_eq!(summary(&targets), vec![(ContainerKind::WebVideo, 360)]);
    }

    #[test]
    fn test_keep_original_resolution() {
        let mut cfg = config(&[480]);
        cfg.keep_original_resolution = true;
        let targets = plan_targets(&cfg, 1000, None);
        assert_eq!(
            summary(&targets),
            vec![(ContainerKind::WebVideo, 1000), (ContainerKind::WebVideo, 480)]
        );
    }

    #[test]
    fn test_both_containers_and_fps_cap() {
        let mut cfg = config(&[480]);
        cfg.hls = true;
        cfg.max_fps = 30.0;
        let targets = plan_targets(&cfg, 480, Some(59.94));
        assert_eq!(
            summary(&targets),
            vec![(ContainerKind::WebVideo, 480), (ContainerKind::Hls, 480)]
        );
        assert!(targets.iter().all(|t| t.fps == Some(30.0)));
    }

    #[test]
    fn test_audio_only_target_has_no_fps() {
        let targets = plan_targets(&config(&[0, 240]), 480, Some(25.0));
        assert_eq!(
            summary(&targets),
            vec![(ContainerKind::WebVideo, 240), (ContainerKind::WebVideo, 0)]
        );
        assert_eq!(targets[1].fps, None);
    }
}
