//! Rendition production and replacement.

mod common;

use std::path::Path;

use assert_matches::assert_matches;
use common::{files_under, Fixture};
use vodforge::jobs::TranscodePayload;
use vodforge::transcoding::RenditionTarget;
use vodforge::{AdvanceOutcome, JobPayload};
use vodforge_common::{AssetState, ContainerKind};

#[tokio::test]
async fn test_retranscode_replaces_rendition_for_same_key() {
    let fx = Fixture::new();
    let asset = fx.publish(720, 10.0).await;
    let old = fx
        .renditions(asset.id)
        .into_iter()
        .find(|r| r.resolution == 480)
        .unwrap();

    fx.pipeline
        .register_job(&JobPayload::Transcode(TranscodePayload {
            asset_id: asset.id,
            target: RenditionTarget {
                container: ContainerKind::WebVideo,
                resolution: 480,
                fps: Some(30.0),
            },
            previous_state: None,
            is_new: false,
        }))
        .await
        .unwrap();
    assert_eq!(fx.drain().await, 1);

    let at_480: Vec<_> = fx
        .renditions(asset.id)
        .into_iter()
        .filter(|r| r.container == ContainerKind::WebVideo && r.resolution == 480)
        .collect();
    assert_eq!(at_480.len(), 1);
    assert_ne!(at_480[0].location, old.location);
    assert_ne!(at_480[0].descriptor, old.descriptor);
    assert!(Path::new(&at_480[0].location).exists());
    assert!(!Path::new(&old.location).exists());

    // 720p upload plus the 480p rendition
    assert_eq!(files_under(&fx.data_dir().join("web-videos")).len(), 2);
    assert_eq!(fx.asset(asset.id).state, AssetState::Published);
}

#[tokio::test]
async fn test_targets_above_source_are_skipped() {
    let fx = Fixture::with_config(|config, _| {
        config.transcoding.resolutions = vec![240, 480, 1080];
    });
    let (_, outcome) = fx.ingest(480, 10.0).await;
    assert_matches!(outcome, AdvanceOutcome::ToTranscode { jobs: 2, .. });
    fx.drain().await;
    assert!(fx
        .encoder
        .jobs()
        .iter()
        .all(|j| !matches!(j, vodforge_av::EncodeJob::Transcode(t) if t.resolution > 480)));
}

#[tokio::test]
async fn test_fps_is_capped() {
    let fx = Fixture::with_config(|config, _| {
        config.transcoding.max_fps = 25.0;
    });
    let asset = fx.publish(720, 10.0).await;
    let rendition = fx
        .renditions(asset.id)
        .into_iter()
        .find(|r| r.resolution == 480)
        .unwrap();
    assert_eq!(rendition.fps, Some(25.0));
}

#[tokio::test]
async fn test_hls_renditions_get_a_master_playlist() {
    let fx = Fixture::with_config(|config, _| {
        config.transcoding.web_videos = false;
        config.transcoding.hls = true;
        config.transcoding.resolutions = vec![240, 480];
    });
    let asset = fx.publish(720, 10.0).await;
    assert_eq!(asset.state, AssetState::Published);

    let renditions = fx.renditions(asset.id);
    let hls: Vec<_> = renditions
        .iter()
        .filter(|r| r.container == ContainerKind::Hls)
        .collect();
    assert_eq!(hls.len(), 2);
    // The uploaded web video stays as the source for later work.
    assert!(renditions
        .iter()
        .any(|r| r.container == ContainerKind::WebVideo && r.resolution == 720));

    let master = fx.pipeline.layout().master_playlist(asset.id);
    let contents = std::fs::read_to_string(&master).unwrap();
    assert!(contents.starts_with("#EXTM3U"));
    assert_eq!(contents.matches("#EXT-X-STREAM-INF").count(), 2);

    // best first
    let mut by_resolution = hls.clone();
    by_resolution.sort_by(|a, b| b.resolution.cmp(&a.resolution));
    let names: Vec<String> = by_resolution
        .iter()
        .map(|r| {
            Path::new(r.playlist_location.as_deref().unwrap())
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    let first = contents.find(&names[0]).unwrap();
    let second = contents.find(&names[1]).unwrap();
    assert!(first < second);
    for rendition in &hls {
        assert!(Path::new(&rendition.location).exists());
        assert!(master.parent().unwrap().join(
            Path::new(rendition.playlist_location.as_deref().unwrap())
                .file_name()
                .unwrap()
        )
        .exists());
    }
}

#[tokio::test]
async fn test_concurrent_workers_publish_once() {
    let fx = Fixture::with_config(|config, _| {
        config.transcoding.resolutions = vec![240, 360, 480];
        config.jobs.concurrency = 3;
    });
    let (asset, _) = fx.ingest(720, 10.0).await;

    let pipeline = std::sync::Arc::new(fx.pipeline);
    let cancel = tokio_util::sync::CancellationToken::new();
    let workers = vodforge::jobs::spawn_workers(pipeline.clone(), cancel.clone());

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let state = {
            let conn = vodforge_db::pool::get_conn(pipeline.pool()).unwrap();
            vodforge_db::queries::assets::get_asset(&conn, asset.id)
                .unwrap()
                .unwrap()
                .state
        };
        if state == AssetState::Published {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "asset never published");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    cancel.cancel();
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(
        fx.notifier
            .count(common::Notice::PublishedAfterTranscoding(asset.id)),
        1
    );
    assert_eq!(fx.notifier.count(common::Notice::Announced(asset.id)), 1);
}
