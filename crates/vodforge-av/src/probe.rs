//! Media metadata extracted from ffprobe output.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// What the pipeline needs to know about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProbeInfo {
    /// Container format name(s) as reported by ffprobe.
    pub format: String,
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub has_audio: bool,
    pub size_bytes: u64,
}

impl ProbeInfo {
    pub fn has_video(&self) -> bool {
        self.width.is_some() && self.height.is_some()
    }

    /// Resolution label: the shorter side, so portrait and landscape videos
    /// of the same quality share a label.
    pub fn resolution(&self) -> u32 {
        match (self.width, self.height) {
            (Some(w), Some(h)) => w.min(h),
            _ => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    disposition: FfprobeDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

/// Parse the JSON printed by `ffprobe -print_format json -show_format -show_streams`.
pub fn parse_ffprobe_json(json: &str) -> Result<ProbeInfo> {
    let output: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| Error::parse_error("ffprobe", e.to_string()))?;

    // Cover art shows up as a video stream; skip it.
    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type == "video" && s.disposition.attached_pic == 0);

    Ok(ProbeInfo {
        format: output.format.format_name,
        duration_secs: output
            .format
            .duration
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0),
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        fps: video.and_then(|v| {
            v.avg_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .or_else(|| v.r_frame_rate.as_deref().and_then(parse_frame_rate))
        }),
        has_audio: output.streams.iter().any(|s| s.codec_type == "audio"),
        size_bytes: output.format.size.and_then(|s| s.parse().ok()).unwrap_or(0),
    })
}

/// Parse "30000/1001" or "25" into frames per second. "0/0" yields `None`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse().ok()?,
    };
    (value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "r_frame_rate": "30/1", "avg_frame_rate": "30000/1001"},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "channels": 2},
            {"index": 2, "codec_type": "video", "codec_name": "mjpeg", "width": 300, "height": 300,
             "disposition": {"attached_pic": 1}}
        ],
        "format": {"filename": "in.mp4", "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                   "duration": "12.345000", "size": "1048576"}
    }"#;

    #[test]
    fn parses_video_audio_and_format() {
        let info = parse_ffprobe_json(SAMPLE).unwrap();
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
        assert_eq!(info.resolution(), 1080);
        assert!(info.has_audio);
        assert_eq!(info.size_bytes, 1_048_576);
        assert!((info.duration_secs.unwrap() - 12.345).abs() < 1e-9);
        assert!((info.fps.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn portrait_resolution_uses_short_side() {
        let info = ProbeInfo {
            width: Some(720),
            height: Some(1280),
            ..Default::default()
        };
        assert_eq!(info.resolution(), 720);
    }

    #[test]
    fn audio_only_file_has_no_video() {
        let json = r#"{"streams": [{"codec_type": "audio"}],
                       "format": {"format_name": "mp3", "duration": "3.0"}}"#;
        let info = parse_ffprobe_json(json).unwrap();
        assert!(!info.has_video());
        assert_eq!(info.resolution(), 0);
        assert_eq!(info.fps, None);
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        assert!(matches!(
            parse_ffprobe_json("not json"),
            Err(Error::ParseError { .. })
        ));
    }

    #[test]
    fn frame_rate_parsing() {
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("50/2"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }
}
