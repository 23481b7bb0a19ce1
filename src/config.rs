//! Pipeline configuration, loaded from TOML.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields the stock setup: `HippoCrop` series, reports under
//! `report/temp`, and a local Orthanc archive on port 4242.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::enums::{Orientation, SortBy};
use crate::pacs::StoreScu;
use crate::secondary_capture::DEFAULT_UID_ROOT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub series: SeriesConfig,
    pub model: ModelConfig,
    pub report: ReportConfig,
    pub pacs: StoreScu,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    /// SeriesDescription of the series to run inference on
    pub description: String,
    pub sort_by: SortBy,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            description: "HippoCrop".to_string(),
            sort_by: SortBy::InstanceNumber,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub patch_size: usize,
    pub anterior_threshold: f32,
    pub posterior_threshold: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            patch_size: 64,
            anterior_threshold: 0.35,
            posterior_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub temp_dir: PathBuf,
    pub sent_dir: PathBuf,
    pub images_dir: Option<PathBuf>,
    pub series_description: String,
    pub uid_root: String,
    pub orientation: Orientation,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("report/temp"),
            sent_dir: PathBuf::from("report/sent"),
            images_dir: None,
            series_description: "HippoVolume.AI".to_string(),
            uid_root: DEFAULT_UID_ROOT.to_string(),
            orientation: Orientation::Axial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub move_sent_reports: bool,
    pub remove_study_dir: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            move_sent_reports: true,
            remove_study_dir: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }
}
