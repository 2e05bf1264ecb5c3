use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vodforge_av::OverlayPlacement;
use vodforge_common::{Error, Result};

/// An edit task as submitted: a kind tag plus free-form options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEditTask {
    #[serde(alias = "name")]
    pub kind: String,
    #[serde(default)]
    pub options: Value,
}

/// One validated editing step.
#[derive(Debug, Clone, PartialEq)]
pub enum EditTask {
    /// Keep `[start, end)`; an open bound keeps that end of the video.
    Cut { start: Option<f64>, end: Option<f64> },
    AddIntro { file: PathBuf },
    AddOutro { file: PathBuf },
    AddWatermark {
        file: PathBuf,
        placement: OverlayPlacement,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CutOptions {
    start: Option<f64>,
    end: Option<f64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileOptions {
    file: PathBuf,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WatermarkOptions {
    file: PathBuf,
    #[serde(default, alias = "ratio")]
    size_ratio: Option<f64>,
    #[serde(default)]
    horizontal_margin_ratio: Option<f64>,
    #[serde(default)]
    vertical_margin_ratio: Option<f64>,
}

fn options<T: serde::de::DeserializeOwned>(raw: &RawEditTask) -> Result<T> {
    let value = match &raw.options {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(value)
        .map_err(|e| Error::invalid_input(format!("bad options for {}: {}", raw.kind, e)))
}

fn ratio(name: &str, value: Option<f64>, default: f64) -> Result<f64> {
    match value {
        None => Ok(default),
        Some(v) if v > 0.0 && v <= 1.0 => Ok(v),
        Some(v) => Err(Error::invalid_input(format!("{name} must be in (0, 1], got {v}"))),
    }
}

impl TryFrom<&RawEditTask> for EditTask {
    type Error = Error;

    fn try_from(raw: &RawEditTask) -> Result<Self> {
        match raw.kind.as_str() {
            "cut" => {
                let CutOptions { start, end } = options(raw)?;
                if start.is_none() && end.is_none() {
                    return Err(Error::invalid_input("cut needs a start or an end"));
                }
                if start.is_some_and(|s| s < 0.0) || end.is_some_and(|e| e <= 0.0) {
                    return Err(Error::invalid_input("cut bounds must be positive"));
                }
                if let (Some(s), Some(e)) = (start, end) {
                    if s >= e {
                        return Err(Error::invalid_input(format!(
                            "cut start {s} is not before end {e}"
                        )));
                    }
                }
                Ok(Self::Cut { start, end })
            }
            "add-intro" => {
                let FileOptions { file } = options(raw)?;
                Ok(Self::AddIntro { file })
            }
            "add-outro" => {
                let FileOptions { file } = options(raw)?;
                Ok(Self::AddOutro { file })
            }
            "add-watermark" => {
                let opts: WatermarkOptions = options(raw)?;
                let defaults = OverlayPlacement::default();
                Ok(Self::AddWatermark {
                    file: opts.file,
                    placement: OverlayPlacement {
                        size_ratio: ratio("size_ratio", opts.size_ratio, defaults.size_ratio)?,
                        horizontal_margin_ratio: ratio(
                            "horizontal_margin_ratio",
                            opts.horizontal_margin_ratio,
                            defaults.horizontal_margin_ratio,
                        )?,
                        vertical_margin_ratio: ratio(
                            "vertical_margin_ratio",
                            opts.vertical_margin_ratio,
                            defaults.vertical_margin_ratio,
                        )?,
                    },
                })
            }
            other => Err(Error::UnsupportedTask(other.to_string())),
        }
    }
}

impl EditTask {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cut { .. } => "cut",
            Self::AddIntro { .. } => "add-intro",
            Self::AddOutro { .. } => "add-outro",
            Self::AddWatermark { .. } => "add-watermark",
        }
    }

    /// External file this task pulls into the workspace.
    pub fn overlay(&self) -> Option<&Path> {
        match self {
            Self::Cut { .. } => None,
            Self::AddIntro { file } | Self::AddOutro { file } | Self::AddWatermark { file, .. } => {
                Some(file)
            }
        }
    }

    /// File whose size the output may grow by, for quota purposes.
    pub fn appended_file(&self) -> Option<&Path> {
        match self {
            Self::AddIntro { file } | Self::AddOutro { file } => Some(file),
            Self::Cut { .. } | Self::AddWatermark { .. } => None,
        }
    }
}

/// Validate a whole task list before anything runs.
pub fn parse_tasks(raw: &[RawEditTask]) -> Result<Vec<EditTask>> {
    if raw.is_empty() {
        return Err(Error::invalid_input("no edit tasks"));
    }
    raw.iter().map(EditTask::try_from).collect()
}
