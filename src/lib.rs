//! # HippoVolume library
//!
//! This crate quantifies hippocampal volume from DICOM studies and measures
//! how well a segmentation agrees with a reference.
//!
//! It builds on the dicom-rs ecosystem to turn a routed study into a volume,
//! runs a slice-wise segmentation model over it, and reports the anterior and
//! posterior hippocampal volumes:
//!  - the newest study directory is scanned and the series described as
//!    `HippoCrop` is stacked into a (depth, height, width) volume
//!  - every axial slice is segmented in parallel using rayon and the
//!    predictions are stacked back into a label volume
//!  - a report image is rendered, stored as a DICOM Secondary Capture and
//!    sent to an archive with `storescu`
//!
//! Training and validation use the same volumes: [`SlicesDataset`] exposes
//! every slice of a labeled volume as a training sample, and the
//! [`volume_stats`] functions compute Dice, Jaccard, sensitivity and
//! specificity between a prediction and its ground truth.
//!
//! # Examples
//!
//! ## Comparing a prediction against a reference
//!
//! ```
//! # use hippo_volume::volume_stats::{dice3d, jaccard3d, UNDEFINED_METRIC};
//! # use ndarray::Array3;
//! let mut prediction = Array3::<u8>::zeros((3, 3, 3));
//! let mut reference = Array3::<u8>::zeros((3, 3, 3));
//! prediction[[0, 0, 0]] = 1;
//! reference[[0, 0, 0]] = 2;
//!
//! assert_eq!(dice3d(&prediction, &reference).unwrap(), 1.0);
//! assert_eq!(jaccard3d(&prediction, &reference).unwrap(), 1.0);
//!
//! let empty = Array3::<u8>::zeros((3, 3, 3));
//! assert_eq!(dice3d(&empty, &empty).unwrap(), UNDEFINED_METRIC);
//! ```
//!
//! ## Running the inference pipeline on a routing folder
//!
//! ```no_run
//! # use hippo_volume::{Pipeline, PipelineConfig};
//! let pipeline = Pipeline::from_config(PipelineConfig::default())
//!     .expect("should have built the default model");
//! let outcome = pipeline
//!     .run("data/received")
//!     .expect("should have produced a report");
//! println!("total volume: {}", outcome.volumes.total);
//! ```

pub mod config;
pub mod enums;
pub mod evaluation;
pub mod hippocampus;
pub mod inference;
mod interpolator;
pub mod pacs;
pub mod pipeline;
pub mod report;
pub mod secondary_capture;
pub mod slices_dataset;
pub mod volume;
pub mod volume_loader;
pub mod volume_stats;

pub use config::PipelineConfig;
pub use evaluation::{AgreementResult, EvaluationReport, evaluate_pairs};
pub use inference::{InferenceAgent, SegmentationModel, ThresholdModel};
pub use pipeline::{Pipeline, PipelineError, PipelineOutcome};
pub use slices_dataset::{LabeledVolume, SliceSample, SlicesDataset};
pub use volume::Volume;
pub use volume_loader::{StudyHeader, VolumeLoader};
