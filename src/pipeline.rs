use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::PipelineConfig;
use crate::hippocampus::{HippocampusVolumes, PhysicalVolumes};
use crate::inference::{InferenceAgent, InferenceError, SegmentationModel, ThresholdModel};
use crate::pacs::PacsError;
use crate::report::{ReportError, ReportOptions, render_report};
use crate::secondary_capture::{SecondaryCaptureError, SecondaryCaptureOptions, write_report};
use crate::volume_loader::{StudyHeader, VolumeLoader, VolumeLoaderError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] VolumeLoaderError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    SecondaryCapture(#[from] SecondaryCaptureError),

    #[error(transparent)]
    Pacs(#[from] PacsError),
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub study_dir: PathBuf,
    pub report_path: PathBuf,
    pub volumes: HippocampusVolumes,
    pub physical: PhysicalVolumes,
    pub label_shape: (usize, usize, usize),
    pub pushed: bool,
}

pub struct Pipeline<M> {
    config: PipelineConfig,
    agent: InferenceAgent<M>,
    push: bool,
}

impl Pipeline<ThresholdModel> {
    /// Pipeline using the intensity threshold model described by the config
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let model = ThresholdModel::new(
            config.model.anterior_threshold,
            config.model.posterior_threshold,
            config.model.patch_size,
        )?;
        Ok(Self::new(config, model))
    }
}

impl<M: SegmentationModel> Pipeline<M> {
    pub fn new(config: PipelineConfig, model: M) -> Self {
        Self {
            config,
            agent: InferenceAgent::new(model),
            push: true,
        }
    }

    /// Disables sending the report to the archive
    pub fn without_push(mut self) -> Self {
        self.push = false;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs inference on the newest study under `routing_dir` and ships the report
    pub fn run(&self, routing_dir: impl AsRef<Path>) -> Result<PipelineOutcome, PipelineError> {
        let study_dir = VolumeLoader::latest_study_dir(routing_dir)?;
        log::info!("looking for series to run inference on in {}", study_dir.display());

        let objects = VolumeLoader::read_study(&study_dir)?;
        let series = VolumeLoader::select_series(objects, &self.config.series.description)?;
        let header = StudyHeader::from_object(&series[0]);
        let volume = VolumeLoader::load_from_dicom_objects(&series, self.config.series.sort_by)?;
        log::info!("found series of {} slices", volume.dim().0);

        log::info!("running inference");
        let labels = self
            .agent
            .single_volume_inference_unpadded(&volume.normalized())?;
        let volumes = HippocampusVolumes::from_labels(&labels);
        let physical = volumes.in_mm3(volume.voxel_volume_mm3());
        log::info!(
            "volume anterior: {}, posterior: {}, total: {}",
            volumes.anterior,
            volumes.posterior,
            volumes.total
        );

        log::info!("creating report");
        let report_config = &self.config.report;
        let mut options = ReportOptions::new(report_config.orientation, header.patient_id());
        if let Some(dir) = &report_config.images_dir {
            options = options.with_images_dir(dir);
        }
        let rendered = render_report(&volume, &labels, &volumes, &options)?;

        let comments = volumes.summary_lines(&header, &rendered.slice_indices);
        let report_path = report_config
            .temp_dir
            .join(format!("{}.dcm", file_stem(&header)));
        let sc_options = SecondaryCaptureOptions {
            series_description: report_config.series_description.clone(),
            uid_root: report_config.uid_root.clone(),
            timestamp: options.timestamp,
        };
        write_report(&report_path, &header, &rendered.image, &comments, &sc_options)?;

        let pushed = if self.push {
            self.config.pacs.send_directory(&report_config.temp_dir)?;
            log::info!("report sent to storage archive");
            self.housekeeping(&study_dir);
            true
        } else {
            false
        };

        log::info!(
            "inference successful on {}, out: {:?}",
            header.sop_instance_uid().unwrap_or_default(),
            labels.dim()
        );

        Ok(PipelineOutcome {
            study_dir,
            report_path,
            volumes,
            physical,
            label_shape: labels.dim(),
            pushed,
        })
    }

    /// Best-effort cleanup after a successful push
    fn housekeeping(&self, study_dir: &Path) {
        let cleanup = &self.config.cleanup;
        let report = &self.config.report;

        if cleanup.move_sent_reports {
            if let Err(err) = move_files(&report.temp_dir, &report.sent_dir) {
                log::warn!(
                    "some reports could not be moved to {}, move them manually: {err}",
                    report.sent_dir.display()
                );
            }
        }

        if cleanup.remove_study_dir {
            if let Err(err) = fs::remove_dir_all(study_dir) {
                log::warn!("error deleting {}: {err}", study_dir.display());
            }
        }
    }
}

/// Report file name from the patient name, without path separators
fn file_stem(header: &StudyHeader) -> String {
    let name = header.patient_name();
    let name = if name.is_empty() {
        header.patient_id()
    } else {
        name
    };
    let stem: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if stem.is_empty() {
        "report".to_string()
    } else {
        stem
    }
}

fn move_files(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            let target = to.join(entry.file_name());
            fs::rename(entry.path(), &target).or_else(|_| {
                fs::copy(entry.path(), &target)?;
                fs::remove_file(entry.path())
            })?;
            log::debug!("moved {}", target.display());
        }
    }
    Ok(())
}
