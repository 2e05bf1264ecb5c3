//! Shared test harness for integration tests.
//!
//! [`Fixture`] assembles a full [`Pipeline`] on an in-memory database with
//! every directory under one temp dir. The encoder is a [`FakeEncoder`] that
//! writes placeholder files and remembers what each one "contains", keyed by
//! the file's bytes so copies, moves and downloads probe the same.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use vodforge::config::{Config, StorageConfig};
use vodforge::notifications::{FederationNotifier, OwnerNotifier};
use vodforge::pipeline::PipelineBuilder;
use vodforge::{AdvanceOutcome, Pipeline};
use vodforge_av::{EncodeJob, Encoder, ProbeInfo};
use vodforge_common::{AssetId, UserId};
use vodforge_db::models::{Asset, Job, JobStatus, Rendition};
use vodforge_db::pool::{get_conn, init_memory_pool, DbPool, PooledConnection};
use vodforge_db::queries::{assets, jobs, renditions};

/// Encoder double. Every job writes its outputs; ops named in `fail_ops`
/// fail after writing, like a tool that dies half way.
pub struct FakeEncoder {
    probes: Mutex<HashMap<Vec<u8>, ProbeInfo>>,
    fail_ops: Mutex<HashSet<&'static str>>,
    jobs: Mutex<Vec<EncodeJob>>,
}

impl FakeEncoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            probes: Mutex::new(HashMap::new()),
            fail_ops: Mutex::new(HashSet::new()),
            jobs: Mutex::new(Vec::new()),
        })
    }

    /// Pretend `path` holds a video of `height` lines lasting `duration`
    /// seconds. The file's contents must be unique.
    pub fn register(&self, path: &Path, height: u32, duration: f64) {
        let contents = std::fs::read(path).expect("registered file must exist");
        self.probes.lock().insert(contents, video(height, duration));
    }

    pub fn fail(&self, op: &'static str) {
        self.fail_ops.lock().insert(op);
    }

    pub fn jobs(&self) -> Vec<EncodeJob> {
        self.jobs.lock().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.jobs.lock().iter().filter(|j| j.name() == op).count()
    }

    fn lookup(&self, path: &Path) -> Option<ProbeInfo> {
        let contents = std::fs::read(path).ok()?;
        self.probes.lock().get(&contents).cloned()
    }

    fn duration_of(&self, path: &Path) -> f64 {
        self.lookup(path)
            .and_then(|i| i.duration_secs)
            .unwrap_or(0.0)
    }
}

fn video(height: u32, duration: f64) -> ProbeInfo {
    ProbeInfo {
        format: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
        duration_secs: Some(duration),
        width: Some(height * 16 / 9),
        height: Some(height),
        fps: Some(30.0),
        has_audio: true,
        size_bytes: 0,
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn encode(&self, job: &EncodeJob) -> vodforge_av::Result<()> {
        self.jobs.lock().push(job.clone());

        let produced = match job {
            EncodeJob::Transcode(t) => {
                if let Some(hls) = &t.hls {
                    std::fs::write(&hls.playlist, "#EXTM3U\n")?;
                }
                let mut info = video(t.resolution, self.duration_of(&t.input));
                info.fps = t.fps;
                Some(info)
            }
            EncodeJob::Cut {
                input, start, end, ..
            } => {
                let full = self.duration_of(input);
                let duration = end.unwrap_or(full).min(full) - start.unwrap_or(0.0);
                let height = self.lookup(input).and_then(|i| i.height).unwrap_or(720);
                Some(video(height, duration.max(0.0)))
            }
            EncodeJob::Concat {
                first,
                second,
                height,
                ..
            } => Some(video(
                *height,
                self.duration_of(first) + self.duration_of(second),
            )),
            EncodeJob::Overlay { input, .. } => self.lookup(input),
            EncodeJob::Storyboard { .. } => None,
        };

        let contents = format!("{} output {}", job.name(), uuid::Uuid::new_v4()).into_bytes();
        std::fs::write(job.output(), &contents)?;
        if let Some(info) = produced {
            self.probes.lock().insert(contents, info);
        }

        if self.fail_ops.lock().contains(job.name()) {
            return Err(vodforge_av::Error::tool_failed("ffmpeg", "simulated failure"));
        }
        Ok(())
    }

    async fn probe(&self, path: &Path) -> vodforge_av::Result<ProbeInfo> {
        let mut info = self
            .lookup(path)
            .ok_or_else(|| vodforge_av::Error::tool_failed("ffprobe", "unknown file"))?;
        info.size_bytes = std::fs::metadata(path)?.len();
        Ok(info)
    }
}

/// A notification the pipeline sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Announced(AssetId),
    NewContent(AssetId),
    EditFinished(AssetId),
    PublishedAfterTranscoding(AssetId),
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn count(&self, notice: Notice) -> usize {
        self.notices.lock().iter().filter(|n| **n == notice).count()
    }

    pub fn clear(&self) {
        self.notices.lock().clear();
    }
}

#[async_trait]
impl FederationNotifier for RecordingNotifier {
    async fn announce(&self, asset: &Asset) {
        self.notices.lock().push(Notice::Announced(asset.id));
    }
}

#[async_trait]
impl OwnerNotifier for RecordingNotifier {
    async fn new_content(&self, asset: &Asset) {
        self.notices.lock().push(Notice::NewContent(asset.id));
    }

    async fn edit_finished(&self, asset: &Asset) {
        self.notices.lock().push(Notice::EditFinished(asset.id));
    }

    async fn published_after_transcoding(&self, asset: &Asset) {
        self.notices.lock().push(Notice::PublishedAfterTranscoding(asset.id));
    }
}

/// Config with every directory under `root`, one worker and a single
/// 480p web video target.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage = StorageConfig::rooted_at(root.join("data"));
    config.transcoding.resolutions = vec![480];
    config.transcoding.hls = false;
    config.storyboard.enabled = false;
    config.jobs.concurrency = 1;
    config.jobs.poll_interval_ms = 20;
    config.database.retry_backoff_ms = 1;
    config
}

pub struct Fixture {
    pub dir: TempDir,
    pub pool: DbPool,
    pub encoder: Arc<FakeEncoder>,
    pub notifier: Arc<RecordingNotifier>,
    pub pipeline: Pipeline,
    pub owner: UserId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(|_, _| {}, |b| b)
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config, &Path)) -> Self {
        Self::build(adjust, |b| b)
    }

    /// Object storage backed by a `bucket` directory in the temp dir.
    pub fn with_object_storage() -> Self {
        Self::with_config(|config, root| {
            config.object_storage.enabled = true;
            config.object_storage.bucket_dir = Some(root.join("bucket"));
            config.object_storage.base_url = Some("https://cdn.example.com".to_string());
        })
    }

    pub fn build(
        adjust: impl FnOnce(&mut Config, &Path),
        customize: impl FnOnce(PipelineBuilder) -> PipelineBuilder,
    ) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut config = test_config(dir.path());
        adjust(&mut config, dir.path());

        let pool = init_memory_pool().expect("failed to create in-memory pool");
        let encoder = FakeEncoder::new();
        let notifier = Arc::new(RecordingNotifier::default());

        let builder = Pipeline::builder(config, pool.clone(), encoder.clone())
            .federation(notifier.clone())
            .owner_notifier(notifier.clone());
        let pipeline = customize(builder).build();

        Self {
            dir,
            pool,
            encoder,
            notifier,
            pipeline,
            owner: UserId::new(),
        }
    }

    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.pool).expect("failed to get db connection")
    }

    /// Write an upload outside the data dir and describe it to the encoder.
    pub fn upload(&self, name: &str, height: u32, duration: f64) -> PathBuf {
        let uploads = self.dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let path = uploads.join(name);
        std::fs::write(&path, format!("{height}p upload {}", uuid::Uuid::new_v4())).unwrap();
        self.encoder.register(&path, height, duration);
        path
    }

    /// A plain file next to the uploads, for intros and watermarks.
    pub fn asset_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let uploads = self.dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let path = uploads.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub async fn ingest(&self, height: u32, duration: f64) -> (Asset, AdvanceOutcome) {
        let file = self.upload(&format!("{}.mp4", uuid::Uuid::new_v4()), height, duration);
        let outcome = self
            .pipeline
            .ingest(self.owner, "holiday", &file)
            .await
            .expect("ingest failed");
        let asset = match &outcome {
            AdvanceOutcome::ToTranscode { asset, .. }
            | AdvanceOutcome::ToExternalStorage(asset)
            | AdvanceOutcome::Published(asset)
            | AdvanceOutcome::Republished(asset) => asset.clone(),
            other => panic!("unexpected ingest outcome: {other:?}"),
        };
        (asset, outcome)
    }

    /// Ingest and drain the queue.
    pub async fn publish(&self, height: u32, duration: f64) -> Asset {
        let (asset, _) = self.ingest(height, duration).await;
        self.drain().await;
        self.asset(asset.id)
    }

    pub async fn drain(&self) -> usize {
        vodforge::jobs::run_until_idle(&self.pipeline)
            .await
            .expect("queue bookkeeping failed")
    }

    pub fn asset(&self, id: AssetId) -> Asset {
        assets::get_asset(&self.conn(), id)
            .unwrap()
            .expect("asset should exist")
    }

    pub fn renditions(&self, id: AssetId) -> Vec<Rendition> {
        renditions::list_for_asset(&self.conn(), id).unwrap()
    }

    pub fn jobs(&self, id: AssetId) -> Vec<Job> {
        jobs::list_jobs_for_asset(&self.conn(), id).unwrap()
    }

    pub fn failed_jobs(&self, id: AssetId) -> Vec<Job> {
        self.jobs(id)
            .into_iter()
            .filter(|j| j.status == JobStatus::Failed)
            .collect()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.pipeline.config().storage.data_dir.clone()
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.dir.path().join("bucket")
    }

    /// Files left in the scratch dir, recursively.
    pub fn tmp_files(&self) -> Vec<PathBuf> {
        files_under(&self.pipeline.config().storage.tmp_dir())
    }
}

pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(files_under(&path));
        } else {
            found.push(path);
        }
    }
    found
}
