//! Slice-wise view over a collection of labeled volumes, as consumed by a
//! 2D segmentation training loop.
//!
//! Volumes are laid out as (depth, height, width); every axis-0 slice of
//! every volume becomes one sample of shape `[1, height, width]`.

use ndarray::{Array3, Axis};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatasetError {
    #[error("image shape {image:?} does not match segmentation shape {seg:?}")]
    ShapeMismatch { image: Vec<usize>, seg: Vec<usize> },
}

/// An image volume paired with its segmentation
#[derive(Debug, Clone)]
pub struct LabeledVolume {
    image: Array3<f32>,
    seg: Array3<u8>,
}

impl LabeledVolume {
    pub fn new(image: Array3<f32>, seg: Array3<u8>) -> Result<Self, DatasetError> {
        if image.shape() != seg.shape() {
            return Err(DatasetError::ShapeMismatch {
                image: image.shape().to_vec(),
                seg: seg.shape().to_vec(),
            });
        }
        Ok(Self { image, seg })
    }

    pub fn image(&self) -> &Array3<f32> {
        &self.image
    }

    pub fn seg(&self) -> &Array3<u8> {
        &self.seg
    }

    pub fn depth(&self) -> usize {
        self.image.len_of(Axis(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SliceSample {
    pub id: usize,
    /// `[1, height, width]`
    pub image: Array3<f32>,
    /// `[1, height, width]`
    pub seg: Array3<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct SlicesDataset {
    data: Vec<LabeledVolume>,
    slices: Vec<(usize, usize)>,
}

impl SlicesDataset {
    pub fn new(data: Vec<LabeledVolume>) -> Self {
        let slices = data
            .iter()
            .enumerate()
            .flat_map(|(volume, d)| (0..d.depth()).map(move |slice| (volume, slice)))
            .collect();
        Self { data, slices }
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// `(volume index, slice index)` of a sample
    pub fn location(&self, idx: usize) -> Option<(usize, usize)> {
        self.slices.get(idx).copied()
    }

    pub fn get(&self, idx: usize) -> Option<SliceSample> {
        let (volume, slice) = self.location(idx)?;
        let entry = &self.data[volume];

        let image = entry
            .image
            .index_axis(Axis(0), slice)
            .insert_axis(Axis(0))
            .to_owned();
        let seg = entry
            .seg
            .index_axis(Axis(0), slice)
            .insert_axis(Axis(0))
            .mapv(f32::from);

        Some(SliceSample {
            id: idx,
            image,
            seg,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = SliceSample> + '_ {
        (0..self.len()).filter_map(|idx| self.get(idx))
    }
}
