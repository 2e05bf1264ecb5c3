//! [`Encoder`] backed by the ffmpeg and ffprobe command-line tools.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::command::ToolCommand;
use crate::encoder::{EncodeJob, Encoder, OverlayPlacement, TranscodeJob};
use crate::probe::{parse_ffprobe_json, ProbeInfo};
use crate::tools::get_tool_path;
use crate::{Error, Result};

/// Encoder settings shared by every job.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegSettings {
    pub video_codec: String,
    pub preset: String,
    pub crf: u32,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// 0 lets ffmpeg decide.
    pub threads: u32,
    pub timeout: Duration,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            threads: 0,
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Drives `ffmpeg` for encoding and `ffprobe` for probing.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    settings: FfmpegSettings,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, settings: FfmpegSettings) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            settings,
        }
    }

    /// Resolve the tools from configured paths or PATH.
    pub fn discover(
        ffmpeg: Option<&Path>,
        ffprobe: Option<&Path>,
        settings: FfmpegSettings,
    ) -> Result<Self> {
        Ok(Self::new(
            get_tool_path("ffmpeg", ffmpeg)?,
            get_tool_path("ffprobe", ffprobe)?,
            settings,
        ))
    }

    fn video_codec_args(&self, args: &mut Vec<String>) {
        let s = &self.settings;
        args.extend([
            "-c:v".to_string(),
            s.video_codec.clone(),
            "-preset".to_string(),
            s.preset.clone(),
            "-crf".to_string(),
            s.crf.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]);
    }

    fn audio_codec_args(&self, args: &mut Vec<String>) {
        args.extend([
            "-c:a".to_string(),
            self.settings.audio_codec.clone(),
            "-b:a".to_string(),
            self.settings.audio_bitrate.clone(),
        ]);
    }

    fn common_prefix(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-y".to_string()];
        if self.settings.threads > 0 {
            args.extend(["-threads".to_string(), self.settings.threads.to_string()]);
        }
        args
    }

    /// Build the ffmpeg argument list for a job.
    pub fn build_args(&self, job: &EncodeJob) -> Vec<String> {
        let mut args = self.common_prefix();

        match job {
            EncodeJob::Transcode(t) => self.transcode_args(t, &mut args),
            EncodeJob::Cut {
                input,
                output,
                start,
                end,
            } => {
                args.extend(["-i".to_string(), path_arg(input)]);
                if let Some(start) = start {
                    args.extend(["-ss".to_string(), format_secs(*start)]);
                }
                if let Some(end) = end {
                    args.extend(["-to".to_string(), format_secs(*end)]);
                }
                self.video_codec_args(&mut args);
                self.audio_codec_args(&mut args);
                args.extend(["-movflags".to_string(), "+faststart".to_string()]);
                args.push(path_arg(output));
            }
            EncodeJob::Concat {
                first,
                second,
                output,
                width,
                height,
            } => {
                args.extend([
                    "-i".to_string(),
                    path_arg(first),
                    "-i".to_string(),
                    path_arg(second),
                    "-filter_complex".to_string(),
                    concat_filter(*width, *height),
                    "-map".to_string(),
                    "[v]".to_string(),
                    "-map".to_string(),
                    "[a]".to_string(),
                ]);
                self.video_codec_args(&mut args);
                self.audio_codec_args(&mut args);
                args.extend(["-movflags".to_string(), "+faststart".to_string()]);
                args.push(path_arg(output));
            }
            EncodeJob::Overlay {
                input,
                overlay,
                output,
                placement,
            } => {
                args.extend([
                    "-i".to_string(),
                    path_arg(input),
                    "-i".to_string(),
                    path_arg(overlay),
                    "-filter_complex".to_string(),
                    overlay_filter(placement),
                    "-map".to_string(),
                    "[v]".to_string(),
                    "-map".to_string(),
                    "0:a?".to_string(),
                ]);
                self.video_codec_args(&mut args);
                args.extend([
                    "-c:a".to_string(),
                    "copy".to_string(),
                    "-movflags".to_string(),
                    "+faststart".to_string(),
                ]);
                args.push(path_arg(output));
            }
            EncodeJob::Storyboard {
                input,
                output,
                interval_secs,
                sprite_width,
                sprite_height,
                columns,
                rows,
            } => {
                args.extend([
                    "-i".to_string(),
                    path_arg(input),
                    "-vf".to_string(),
                    format!(
                        "fps=1/{},scale={}:{},tile={}x{}",
                        (*interval_secs).max(1),
                        sprite_width,
                        sprite_height,
                        columns,
                        rows
                    ),
                    "-frames:v".to_string(),
                    "1".to_string(),
                    "-q:v".to_string(),
                    "2".to_string(),
                ]);
                args.push(path_arg(output));
            }
        }

        args
    }

    fn transcode_args(&self, job: &TranscodeJob, args: &mut Vec<String>) {
        args.extend(["-i".to_string(), path_arg(&job.input)]);

        if job.resolution == 0 {
            args.push("-vn".to_string());
        } else {
            // Even dimensions; the short side gets the target resolution.
            args.extend([
                "-vf".to_string(),
                format!(
                    "scale=w='if(gte(iw,ih),-2,{r})':h='if(gte(iw,ih),{r},-2)'",
                    r = job.resolution
                ),
            ]);
            if let Some(fps) = job.fps {
                args.extend(["-r".to_string(), format_secs(fps)]);
            }
            self.video_codec_args(args);
        }
        self.audio_codec_args(args);

        match &job.hls {
            Some(hls) => {
                args.extend([
                    "-f".to_string(),
                    "hls".to_string(),
                    "-hls_time".to_string(),
                    hls.segment_secs.max(1).to_string(),
                    "-hls_playlist_type".to_string(),
                    "vod".to_string(),
                    "-hls_segment_type".to_string(),
                    "fmp4".to_string(),
                    "-hls_flags".to_string(),
                    "single_file".to_string(),
                    "-hls_segment_filename".to_string(),
                    path_arg(&job.output),
                    path_arg(&hls.playlist),
                ]);
            }
            None => {
                args.extend(["-movflags".to_string(), "+faststart".to_string()]);
                args.push(path_arg(&job.output));
            }
        }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, job: &EncodeJob) -> Result<()> {
        let args = self.build_args(job);
        tracing::info!(op = job.name(), output = %job.output().display(), "Starting ffmpeg");

        ToolCommand::new(self.ffmpeg.clone())
            .args(args)
            .timeout(self.settings.timeout)
            .execute()
            .await?;

        if !job.output().exists() {
            return Err(Error::tool_failed(
                "ffmpeg",
                format!("no output written to {}", job.output().display()),
            ));
        }
        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<ProbeInfo> {
        if !path.exists() {
            return Err(Error::file_not_found(path));
        }

        let output = ToolCommand::new(self.ffprobe.clone())
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path_arg(path))
            .timeout(Duration::from_secs(60))
            .execute()
            .await?;

        parse_ffprobe_json(&output.stdout)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn format_secs(secs: f64) -> String {
    format!("{:.3}", secs)
}

fn concat_filter(width: u32, height: u32) -> String {
    let fit = |input: usize| {
        format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1[v{i}]",
            i = input,
            w = width,
            h = height
        )
    };
    format!(
        "{};{};[v0][0:a][v1][1:a]concat=n=2:v=1:a=1[v][a]",
        fit(0),
        fit(1)
    )
}

fn overlay_filter(placement: &OverlayPlacement) -> String {
    format!(
        "[1:v][0:v]scale2ref=w=oh*mdar:h=ih*{size}[wm][base];\
         [base][wm]overlay=x=main_w-overlay_w-main_w*{hm}:y=main_h*{vm}[v]",
        size = placement.size_ratio,
        hm = placement.horizontal_margin_ratio,
        vm = placement.vertical_margin_ratio
    )
}
