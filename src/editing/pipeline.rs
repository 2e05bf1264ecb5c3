//! Running edit tasks as a chain.
//!
//! Each task reads the previous task's output and writes a fresh file in a
//! private workspace. Intermediates are discarded as soon as the next step
//! has consumed them; on failure the workspace goes away with everything in
//! it. The source file is only ever read.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vodforge_av::{EncodeJob, Encoder, Workspace};
use vodforge_common::{AssetId, Error, Result};

use super::EditTask;
use crate::quota::QuotaStatus;

/// Output of a successful run. The file lives until this value is dropped.
#[derive(Debug)]
pub struct EditedFile {
    path: PathBuf,
    _workspace: Workspace,
}

impl EditedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The file a step reads from.
enum Input<'a> {
    Source(&'a Path),
    Intermediate(PathBuf),
}

impl Input<'_> {
    fn path(&self) -> &Path {
        match self {
            Self::Source(path) => path,
            Self::Intermediate(path) => path,
        }
    }

    /// Give up this input once the next step has consumed it.
    fn retire(self, workspace: &Workspace) {
        if let Self::Intermediate(path) = self {
            if let Err(e) = workspace.discard(&path) {
                tracing::warn!(path = %path.display(), "Failed to discard intermediate: {}", e);
            }
        }
    }
}

pub struct EditingPipeline {
    encoder: Arc<dyn Encoder>,
    tmp_dir: PathBuf,
}

impl EditingPipeline {
    pub fn new(encoder: Arc<dyn Encoder>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            encoder,
            tmp_dir: tmp_dir.into(),
        }
    }

    /// Apply `tasks` in order to `source`.
    ///
    /// Refuses to start unless quota was checked by the caller.
    pub async fn run(
        &self,
        asset_id: AssetId,
        source: &Path,
        tasks: &[EditTask],
        quota: QuotaStatus,
    ) -> Result<EditedFile> {
        if quota != QuotaStatus::Verified {
            return Err(Error::QuotaNotVerified);
        }
        if tasks.is_empty() {
            return Err(Error::invalid_input("no edit tasks"));
        }

        let workspace = Workspace::new_in(&self.tmp_dir)?;
        let mut input = Input::Source(source);

        for (index, task) in tasks.iter().enumerate() {
            let output = workspace.temp_file(&format!("{index}-{}.mp4", task.name()));
            tracing::debug!(asset_id = %asset_id, index, task = task.name(), "Applying edit task");

            self.apply(&workspace, index, task, input.path(), &output)
                .await
                .map_err(|e| {
                    tracing::error!(asset_id = %asset_id, index, task = task.name(), "Edit task failed: {}", e);
                    Error::EditTaskFailed {
                        index,
                        kind: task.name().to_string(),
                        message: e.to_string(),
                    }
                })?;

            input.retire(&workspace);
            input = Input::Intermediate(output);
        }

        match input {
            Input::Intermediate(path) => {
                tracing::info!(asset_id = %asset_id, tasks = tasks.len(), "Edit tasks applied");
                Ok(EditedFile {
                    path,
                    _workspace: workspace,
                })
            }
            Input::Source(_) => Err(Error::internal("edit produced no output")),
        }
    }

    async fn apply(
        &self,
        workspace: &Workspace,
        index: usize,
        task: &EditTask,
        input: &Path,
        output: &Path,
    ) -> Result<()> {
        let overlay = match task.overlay() {
            Some(file) => Some(workspace.import(file, &overlay_name(index, file))?),
            None => None,
        };

        let result = self.encode(task, input, output, overlay.as_deref()).await;

        if let Some(path) = &overlay {
            if let Err(e) = workspace.discard(path) {
                tracing::warn!(path = %path.display(), "Failed to discard overlay: {}", e);
            }
        }
        if result.is_err() {
            let _ = workspace.discard(output);
        }
        result
    }

    async fn encode(
        &self,
        task: &EditTask,
        input: &Path,
        output: &Path,
        overlay: Option<&Path>,
    ) -> Result<()> {
        let overlay = || {
            overlay
                .map(Path::to_path_buf)
                .ok_or_else(|| Error::internal("overlay was not materialized"))
        };

        let job = match task {
            EditTask::Cut { start, end } => EncodeJob::Cut {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
                start: *start,
                end: *end,
            },
            EditTask::AddIntro { .. } => {
                let (width, height) = self.dimensions(input).await?;
                EncodeJob::Concat {
                    first: overlay()?,
                    second: input.to_path_buf(),
                    output: output.to_path_buf(),
                    width,
                    height,
                }
            }
            EditTask::AddOutro { .. } => {
                let (width, height) = self.dimensions(input).await?;
                EncodeJob::Concat {
                    first: input.to_path_buf(),
                    second: overlay()?,
                    output: output.to_path_buf(),
                    width,
                    height,
                }
            }
            EditTask::AddWatermark { placement, .. } => EncodeJob::Overlay {
                input: input.to_path_buf(),
                overlay: overlay()?,
                output: output.to_path_buf(),
                placement: *placement,
            },
        };

        self.encoder.encode(&job).await?;
        Ok(())
    }

    /// Frame size of the video being edited; intros and outros are fitted to it.
    async fn dimensions(&self, input: &Path) -> Result<(u32, u32)> {
        let info = self.encoder.probe(input).await?;
        match (info.width, info.height) {
            (Some(w), Some(h)) => Ok((w, h)),
            _ => Err(Error::invalid_input(format!(
                "{} has no video stream",
                input.display()
            ))),
        }
    }
}

fn overlay_name(index: usize, file: &Path) -> String {
    match file.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{index}-overlay.{ext}"),
        None => format!("{index}-overlay"),
    }
}
