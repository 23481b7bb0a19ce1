//! Slice-by-slice volume segmentation.
//!
//! A [`SegmentationModel`] only ever sees one 2D axial slice. The
//! [`InferenceAgent`] feeds it every slice of a (depth, height, width)
//! volume in parallel and stacks the predictions back into a label volume.

use ndarray::{Array2, Array3, ArrayView2, Axis, s, stack};
use rayon::prelude::*;
use thiserror::Error;

use crate::enums::HippocampusLabel;

#[derive(Debug, Error, PartialEq)]
pub enum InferenceError {
    #[error("slice {index} has shape {shape:?} but the model returned {returned:?}")]
    OutputShape {
        index: usize,
        shape: (usize, usize),
        returned: (usize, usize),
    },

    #[error("slice shape {shape:?} does not fit in a {patch_size}x{patch_size} patch")]
    SliceTooLarge {
        shape: (usize, usize),
        patch_size: usize,
    },

    #[error("invalid model parameters: {0}")]
    InvalidModel(String),

    #[error("model failed: {0}")]
    Model(String),
}

pub trait SegmentationModel: Sync {
    /// Side length of the square slices the model was trained on
    fn patch_size(&self) -> usize;

    /// Labels for every pixel of a slice; the output shape must equal the input's
    fn predict_slice(&self, slice: ArrayView2<'_, f32>) -> Result<Array2<u8>, InferenceError>;
}

pub struct InferenceAgent<M> {
    model: M,
}

impl<M: SegmentationModel> InferenceAgent<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Infers every axis-0 slice and stacks the predictions
    pub fn single_volume_inference(
        &self,
        volume: &Array3<f32>,
    ) -> Result<Array3<u8>, InferenceError> {
        let (depth, height, width) = volume.dim();
        if depth == 0 {
            return Ok(Array3::zeros((0, height, width)));
        }

        let slices = (0..depth)
            .into_par_iter()
            .map(|index| {
                let slice = volume.index_axis(Axis(0), index);
                let prediction = self.model.predict_slice(slice)?;
                if prediction.dim() != slice.dim() {
                    return Err(InferenceError::OutputShape {
                        index,
                        shape: slice.dim(),
                        returned: prediction.dim(),
                    });
                }
                Ok(prediction)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let views: Vec<_> = slices.iter().map(|s| s.view()).collect();
        let labels = stack(Axis(0), &views).map_err(|err| InferenceError::Model(err.to_string()))?;
        log::debug!("inferred {depth} slices of {height}x{width}");
        Ok(labels)
    }

    /// Pads every slice to the model's patch size, infers, and crops the
    /// labels back to the volume's own height and width
    pub fn single_volume_inference_unpadded(
        &self,
        volume: &Array3<f32>,
    ) -> Result<Array3<u8>, InferenceError> {
        let patch_size = self.model.patch_size();
        let (depth, height, width) = volume.dim();
        if height > patch_size || width > patch_size {
            return Err(InferenceError::SliceTooLarge {
                shape: (height, width),
                patch_size,
            });
        }

        let mut padded = Array3::<f32>::zeros((depth, patch_size, patch_size));
        padded.slice_mut(s![.., ..height, ..width]).assign(volume);

        let labels = self.single_volume_inference(&padded)?;
        Ok(labels.slice(s![.., ..height, ..width]).to_owned())
    }
}

/// Labels voxels of a normalized volume by intensity band
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdModel {
    anterior_threshold: f32,
    posterior_threshold: f32,
    patch_size: usize,
}

impl ThresholdModel {
    pub fn new(
        anterior_threshold: f32,
        posterior_threshold: f32,
        patch_size: usize,
    ) -> Result<Self, InferenceError> {
        let in_range = |t: f32| t > 0.0 && t <= 1.0;
        if !in_range(anterior_threshold) || !in_range(posterior_threshold) {
            return Err(InferenceError::InvalidModel(format!(
                "thresholds must lie in (0, 1], got {anterior_threshold} and {posterior_threshold}"
            )));
        }
        if anterior_threshold > posterior_threshold {
            return Err(InferenceError::InvalidModel(format!(
                "anterior threshold {anterior_threshold} exceeds posterior threshold {posterior_threshold}"
            )));
        }
        if patch_size == 0 {
            return Err(InferenceError::InvalidModel("patch size must be positive".into()));
        }
        Ok(Self {
            anterior_threshold,
            posterior_threshold,
            patch_size,
        })
    }

    fn label(&self, value: f32) -> HippocampusLabel {
        if value >= self.posterior_threshold {
            HippocampusLabel::Posterior
        } else if value >= self.anterior_threshold {
            HippocampusLabel::Anterior
        } else {
            HippocampusLabel::Background
        }
    }
}

impl SegmentationModel for ThresholdModel {
    fn patch_size(&self) -> usize {
        self.patch_size
    }

    fn predict_slice(&self, slice: ArrayView2<'_, f32>) -> Result<Array2<u8>, InferenceError> {
        Ok(slice.mapv(|v| self.label(v).value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(depth: usize, height: usize, width: usize) -> Array3<f32> {
        Array3::from_shape_fn((depth, height, width), |(_, _, x)| {
            x as f32 / (width - 1) as f32
        })
    }

    struct CroppingModel;

    impl SegmentationModel for CroppingModel {
        fn patch_size(&self) -> usize {
            4
        }

        fn predict_slice(&self, slice: ArrayView2<'_, f32>) -> Result<Array2<u8>, InferenceError> {
            let (h, w) = slice.dim();
            Ok(Array2::zeros((h.saturating_sub(1), w)))
        }
    }

    /// Marks the slice with its first pixel so stacking order can be checked
    struct EchoModel;

    impl SegmentationModel for EchoModel {
        fn patch_size(&self) -> usize {
            8
        }

        fn predict_slice(&self, slice: ArrayView2<'_, f32>) -> Result<Array2<u8>, InferenceError> {
            let marker = slice[[0, 0]] as u8;
            Ok(Array2::from_elem(slice.dim(), marker))
        }
    }

    #[test]
    fn threshold_model_assigns_bands() {
        let model = ThresholdModel::new(0.3, 0.7, 8).unwrap();
        let agent = InferenceAgent::new(model);
        let labels = agent.single_volume_inference(&gradient(2, 3, 11)).unwrap();
        assert_eq!(labels.dim(), (2, 3, 11));
        assert_eq!(labels[[0, 0, 0]], 0);
        assert_eq!(labels[[0, 0, 2]], 0);
        assert_eq!(labels[[0, 0, 3]], 1);
        assert_eq!(labels[[1, 2, 6]], 1);
        assert_eq!(labels[[1, 2, 7]], 2);
        assert_eq!(labels[[1, 2, 10]], 2);
    }

    #[test]
    fn slices_are_stacked_in_order() {
        let volume = Array3::from_shape_fn((5, 2, 2), |(z, _, _)| z as f32);
        let labels = InferenceAgent::new(EchoModel)
            .single_volume_inference(&volume)
            .unwrap();
        for z in 0..5 {
            assert!(labels.index_axis(Axis(0), z).iter().all(|&v| v as usize == z));
        }
    }

    #[test]
    fn unpadded_inference_crops_back() {
        let agent = InferenceAgent::new(ThresholdModel::new(0.3, 0.7, 8).unwrap());
        let volume = gradient(3, 5, 6);
        let labels = agent.single_volume_inference_unpadded(&volume).unwrap();
        assert_eq!(labels.dim(), (3, 5, 6));
        assert_eq!(labels, agent.single_volume_inference(&volume).unwrap());
    }

    #[test]
    fn slices_larger_than_patch_are_rejected() {
        let agent = InferenceAgent::new(ThresholdModel::new(0.3, 0.7, 4).unwrap());
        let err = agent
            .single_volume_inference_unpadded(&gradient(1, 5, 3))
            .unwrap_err();
        assert_eq!(
            err,
            InferenceError::SliceTooLarge {
                shape: (5, 3),
                patch_size: 4,
            }
        );
    }

    #[test]
    fn wrong_output_shape_is_an_error() {
        let agent = InferenceAgent::new(CroppingModel);
        let err = agent
            .single_volume_inference(&gradient(2, 3, 3))
            .unwrap_err();
        assert!(matches!(err, InferenceError::OutputShape { shape: (3, 3), returned: (2, 3), .. }));
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        assert!(ThresholdModel::new(0.8, 0.2, 8).is_err());
        assert!(ThresholdModel::new(0.0, 0.5, 8).is_err());
        assert!(ThresholdModel::new(0.2, 1.5, 8).is_err());
        assert!(ThresholdModel::new(0.2, 0.5, 0).is_err());
    }

    #[test]
    fn empty_volume_yields_empty_labels() {
        let agent = InferenceAgent::new(EchoModel);
        let labels = agent
            .single_volume_inference(&Array3::zeros((0, 4, 4)))
            .unwrap();
        assert_eq!(labels.dim(), (0, 4, 4));
    }
}
