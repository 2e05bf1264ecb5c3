//! End-to-end publication flows driven through the job queue.

mod common;

use assert_matches::assert_matches;
use common::{files_under, Fixture, Notice};
use vodforge::jobs::{run_next_job, JobRun, RelocatePayload, StoryboardPayload, TranscodePayload};
use vodforge::notifications::PipelineEvent;
use vodforge::storage::RelocateDirection;
use vodforge::transcoding::RenditionTarget;
use vodforge::{AdvanceContext, AdvanceOutcome, JobPayload};
use vodforge_common::{AssetId, AssetState, ContainerKind, JobStage, StorageKind};
use vodforge_db::models::JobStatus;
use vodforge_db::queries::{assets, job_counts, jobs};

#[tokio::test]
async fn test_upload_is_transcoded_then_published() {
    let fx = Fixture::new();
    let (asset, outcome) = fx.ingest(720, 30.0).await;
    assert_matches!(outcome, AdvanceOutcome::ToTranscode { jobs: 1, .. });
    assert_eq!(asset.state, AssetState::ToTranscode);
    assert!(fx.notifier.notices().is_empty());

    assert_eq!(fx.drain().await, 1);

    let asset = fx.asset(asset.id);
    assert_eq!(asset.state, AssetState::Published);
    assert_eq!(asset.duration_secs, Some(30.0));

    let mut resolutions: Vec<_> = fx
        .renditions(asset.id)
        .iter()
        .map(|r| (r.container, r.resolution))
        .collect();
    resolutions.sort();
    assert_eq!(
        resolutions,
        vec![(ContainerKind::WebVideo, 480), (ContainerKind::WebVideo, 720)]
    );

    assert_eq!(
        fx.notifier.notices(),
        vec![
            Notice::Announced(asset.id),
            Notice::NewContent(asset.id),
            Notice::PublishedAfterTranscoding(asset.id),
        ]
    );
    assert_eq!(
        job_counts::pending(&fx.conn(), asset.id, JobStage::Transcode).unwrap(),
        0
    );
    assert!(fx.tmp_files().is_empty());
}

fn position(events: &[PipelineEvent], wanted: impl Fn(&PipelineEvent) -> bool) -> usize {
    events
        .iter()
        .position(wanted)
        .unwrap_or_else(|| panic!("missing event in {events:?}"))
}

#[tokio::test]
async fn test_event_bus_sees_jobs_and_transitions() {
    let fx = Fixture::new();
    let mut rx = fx.pipeline.events().subscribe();
    let (asset, _) = fx.ingest(720, 10.0).await;
    fx.drain().await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    let started = position(&events, |e| matches!(e, PipelineEvent::JobStarted { .. }));
    let completed = position(&events, |e| matches!(e, PipelineEvent::JobCompleted { .. }));
    let published = position(&events, |e| {
        matches!(e, PipelineEvent::StateChanged { to: AssetState::Published, .. })
    });
    let announced = position(&events, |e| matches!(e, PipelineEvent::Announced { .. }));

    assert!(started < published);
    assert!(published < announced);
    assert!(announced < completed);
    assert!(events
        .iter()
        .filter_map(PipelineEvent::asset_id)
        .all(|id| id == asset.id));
}

#[tokio::test]
async fn test_advancing_published_asset_only_reannounces() {
    let fx = Fixture::new();
    let asset = fx.publish(720, 10.0).await;
    fx.notifier.clear();

    for _ in 0..2 {
        let outcome = fx
            .pipeline
            .advance(asset.id, AdvanceContext::default())
            .await
            .unwrap();
        assert_matches!(outcome, AdvanceOutcome::Republished(_));
    }

    assert_eq!(
        fx.notifier.notices(),
        vec![Notice::Announced(asset.id), Notice::Announced(asset.id)]
    );
    let after = fx.asset(asset.id);
    assert_eq!(after.version, asset.version);
    assert_eq!(after.state, AssetState::Published);
    assert_eq!(fx.drain().await, 0);
}

#[tokio::test]
async fn test_advance_of_unknown_asset_is_missing() {
    let fx = Fixture::new();
    let outcome = fx
        .pipeline
        .advance(AssetId::new(), AdvanceContext::default())
        .await
        .unwrap();
    assert_eq!(outcome, AdvanceOutcome::Missing);
}

#[tokio::test]
async fn test_without_transcoding_upload_publishes_immediately() {
    let fx = Fixture::with_config(|config, _| {
        config.transcoding.enabled = false;
        config.storyboard.enabled = true;
    });
    let (asset, outcome) = fx.ingest(360, 12.0).await;
    assert_matches!(outcome, AdvanceOutcome::Published(_));
    assert_eq!(
        fx.notifier.notices(),
        vec![Notice::Announced(asset.id), Notice::NewContent(asset.id)]
    );

    // Only the storyboard job was queued.
    let queued = fx.jobs(asset.id);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].kind, "generate-storyboard");
    fx.drain().await;
    assert_eq!(fx.encoder.count("transcode"), 0);
    assert_eq!(fx.encoder.count("storyboard"), 1);
}

#[tokio::test]
async fn test_transcode_failure_marks_asset_failed() {
    let fx = Fixture::new();
    fx.encoder.fail("transcode");
    let (asset, _) = fx.ingest(720, 10.0).await;

    assert_matches!(run_next_job(&fx.pipeline, "test").await.unwrap(), JobRun::Failed(_));

    let asset = fx.asset(asset.id);
    assert_eq!(asset.state, AssetState::TranscodingFailed);
    let failed = fx.failed_jobs(asset.id);
    assert_eq!(failed.len(), 1);
    assert!(failed[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("simulated failure"));
    assert_eq!(
        job_counts::pending(&fx.conn(), asset.id, JobStage::Transcode).unwrap(),
        0
    );
    assert!(fx.tmp_files().is_empty());
    assert!(fx.notifier.notices().is_empty());
}

#[tokio::test]
async fn test_late_transcode_does_not_revive_failed_asset() {
    let fx = Fixture::with_config(|config, _| {
        config.transcoding.resolutions = vec![240, 480];
    });
    let (asset, outcome) = fx.ingest(720, 10.0).await;
    assert_matches!(outcome, AdvanceOutcome::ToTranscode { jobs: 2, .. });

    fx.pipeline
        .publication()
        .move_to_failed(asset.id, vodforge_common::FailureKind::Transcoding)
        .await;
    fx.drain().await;

    assert_eq!(fx.asset(asset.id).state, AssetState::TranscodingFailed);
    assert!(fx.notifier.notices().is_empty());
}

#[tokio::test]
async fn test_jobs_for_deleted_asset_succeed_quietly() {
    let fx = Fixture::new();
    let gone = AssetId::new();
    let payloads = [
        JobPayload::Transcode(TranscodePayload {
            asset_id: gone,
            target: RenditionTarget {
                container: ContainerKind::WebVideo,
                resolution: 480,
                fps: None,
            },
            previous_state: None,
            is_new: true,
        }),
        JobPayload::GenerateStoryboard(StoryboardPayload { asset_id: gone }),
        JobPayload::Edit(vodforge::jobs::EditPayload {
            asset_id: gone,
            tasks: vec![serde_json::from_value(serde_json::json!({
                "kind": "cut", "options": {"end": 3.0}
            }))
            .unwrap()],
        }),
    ];
    for payload in &payloads {
        fx.pipeline.register_job(payload).await.unwrap();
    }

    for _ in &payloads {
        assert_matches!(
            run_next_job(&fx.pipeline, "test").await.unwrap(),
            JobRun::Completed(_)
        );
    }
    assert_eq!(
        run_next_job(&fx.pipeline, "test").await.unwrap(),
        JobRun::Idle
    );
    assert!(fx.encoder.jobs().is_empty());
}

#[tokio::test]
async fn test_jobs_outliving_their_asset_complete_without_side_effects() {
    let fx = Fixture::with_config(|config, _| {
        config.storyboard.enabled = true;
    });
    let (asset, _) = fx.ingest(720, 10.0).await;
    fx.pipeline
        .register_job(&JobPayload::GenerateStoryboard(StoryboardPayload {
            asset_id: asset.id,
        }))
        .await
        .unwrap();
    fx.pipeline
        .register_job(&JobPayload::Edit(vodforge::jobs::EditPayload {
            asset_id: asset.id,
            tasks: vec![serde_json::from_value(serde_json::json!({
                "kind": "cut", "options": {"end": 3.0}
            }))
            .unwrap()],
        }))
        .await
        .unwrap();
    let queued = fx.jobs(asset.id).len();
    assert_eq!(queued, 3);

    assert!(assets::delete_asset(&fx.conn(), asset.id).unwrap());

    for _ in 0..queued {
        assert_matches!(
            run_next_job(&fx.pipeline, "test").await.unwrap(),
            JobRun::Completed(_)
        );
    }
    assert_eq!(run_next_job(&fx.pipeline, "test").await.unwrap(), JobRun::Idle);

    assert!(fx.encoder.jobs().is_empty());
    assert!(assets::get_asset(&fx.conn(), asset.id).unwrap().is_none());
    assert!(fx.renditions(asset.id).is_empty());
    assert_eq!(fx.jobs(asset.id).len(), queued);
    assert!(job_counts::list_for_asset(&fx.conn(), asset.id).unwrap().is_empty());
    assert!(fx.notifier.notices().is_empty());
}

#[tokio::test]
async fn test_recovery_redelivers_interrupted_jobs() {
    let fx = Fixture::new();
    let (asset, _) = fx.ingest(720, 10.0).await;

    // A worker claimed the job and then the process died.
    let claimed = jobs::dequeue_next_job(&fx.conn(), "crashed").unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(fx.drain().await, 0);

    let scanned = fx.pipeline.recover().await.unwrap();
    assert_eq!(scanned, 1);
    // Still waiting on the redelivered job, so nothing new was planned.
    assert_eq!(fx.jobs(asset.id).len(), 1);

    assert_eq!(fx.drain().await, 1);
    assert_eq!(fx.asset(asset.id).state, AssetState::Published);
    let job = jobs::get_job(&fx.conn(), claimed.id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn test_published_asset_moves_to_object_storage() {
    let fx = Fixture::with_object_storage();
    let (asset, _) = fx.ingest(720, 10.0).await;

    // transcode, then relocation
    assert_eq!(fx.drain().await, 2);

    let asset = fx.asset(asset.id);
    assert_eq!(asset.state, AssetState::Published);
    let renditions = fx.renditions(asset.id);
    assert_eq!(renditions.len(), 2);
    for rendition in &renditions {
        assert_eq!(rendition.storage, StorageKind::ObjectStorage);
        assert!(rendition.location.starts_with("web-videos/"));
        assert!(fx.bucket_dir().join(&rendition.location).exists());
    }
    assert!(files_under(&fx.data_dir().join("web-videos")).is_empty());
    assert_eq!(
        fx.notifier.notices(),
        vec![
            Notice::Announced(asset.id),
            Notice::NewContent(asset.id),
            Notice::PublishedAfterTranscoding(asset.id),
        ]
    );
}

#[tokio::test]
async fn test_operator_moves_asset_back_to_file_system() {
    let fx = Fixture::with_object_storage();
    let asset = fx.publish(720, 10.0).await;
    fx.notifier.clear();

    let moving = fx.pipeline.move_to_file_system(asset.id).await.unwrap();
    assert_eq!(moving.state, AssetState::ToFileSystem);
    // A second request while the first is pending is refused.
    assert!(fx.pipeline.move_to_file_system(asset.id).await.is_err());

    assert_eq!(fx.drain().await, 1);
    assert_eq!(fx.asset(asset.id).state, AssetState::Published);
    for rendition in fx.renditions(asset.id) {
        assert_eq!(rendition.storage, StorageKind::FileSystem);
        assert!(std::path::Path::new(&rendition.location).exists());
    }
    assert!(files_under(&fx.bucket_dir()).is_empty());
    assert_eq!(fx.notifier.notices(), vec![Notice::Announced(asset.id)]);
}

#[tokio::test]
async fn test_move_to_file_system_needs_object_storage() {
    let fx = Fixture::new();
    let asset = fx.publish(480, 5.0).await;
    assert!(fx.pipeline.move_to_file_system(asset.id).await.is_err());
    assert_eq!(fx.asset(asset.id).state, AssetState::Published);
}

#[tokio::test]
async fn test_relocation_failure_marks_asset_failed() {
    let fx = Fixture::with_object_storage();
    let asset = fx.publish(720, 10.0).await;

    // Remove the objects behind the pipeline's back; the download must fail.
    std::fs::remove_dir_all(fx.bucket_dir()).unwrap();
    fx.pipeline.move_to_file_system(asset.id).await.unwrap();
    fx.drain().await;

    assert_eq!(fx.asset(asset.id).state, AssetState::FileSystemFailed);
    assert_eq!(
        job_counts::pending(&fx.conn(), asset.id, JobStage::Relocate).unwrap(),
        0
    );
}

#[tokio::test]
async fn test_enqueued_relocation_for_missing_asset_completes() {
    let fx = Fixture::with_object_storage();
    fx.pipeline
        .register_job(&JobPayload::RelocateStorage(RelocatePayload {
            asset_id: AssetId::new(),
            direction: RelocateDirection::ToExternal,
            previous_state: None,
            is_new: false,
        }))
        .await
        .unwrap();
    assert_matches!(
        run_next_job(&fx.pipeline, "test").await.unwrap(),
        JobRun::Completed(_)
    );
}
