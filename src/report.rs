//! Visual inference report.
//!
//! The report is a 1000x1000 RGB canvas with two bars showing how the total
//! hippocampal volume splits between the anterior (red) and posterior (green)
//! structures, and three grayscale tiles where the prediction is burned onto
//! the original intensities.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use image::{DynamicImage, GrayImage, ImageBuffer, Rgb, RgbImage, imageops};
use ndarray::{Array2, Array3, ArrayView2};
use thiserror::Error;

use crate::enums::Orientation;
use crate::hippocampus::HippocampusVolumes;
use crate::interpolator::Interpolator;
use crate::volume::{Volume, slice_along};

pub const REPORT_SIZE: u32 = 1000;
pub const TILE_WIDTH: u32 = 300;
pub const TILE_HEIGHT: u32 = 400;
const TILE_TOP: i64 = 400;
const TILE_STRIDE: i64 = 325;
const MARGIN: u32 = 10;
const BAR_HEIGHT: u32 = 40;
const ANTERIOR_COLOR: Rgb<u8> = Rgb([220, 50, 47]);
const POSTERIOR_COLOR: Rgb<u8> = Rgb([133, 200, 0]);

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("label shape {labels:?} does not match volume shape {volume:?}")]
    ShapeMismatch {
        volume: (usize, usize, usize),
        labels: (usize, usize, usize),
    },

    #[error("volume has no slices along the {0:?} axis")]
    EmptyVolume(Orientation),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub orientation: Orientation,
    /// Where to save each overlay tile as PNG, if anywhere
    pub images_dir: Option<PathBuf>,
    pub patient_id: String,
    pub timestamp: DateTime<Local>,
}

impl ReportOptions {
    pub fn new(orientation: Orientation, patient_id: impl Into<String>) -> Self {
        Self {
            orientation,
            images_dir: None,
            patient_id: patient_id.into(),
            timestamp: Local::now(),
        }
    }

    pub fn with_images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.images_dir = Some(dir.into());
        self
    }
}

pub struct RenderedReport {
    pub image: RgbImage,
    pub slice_indices: [usize; 3],
    pub tile_paths: Vec<PathBuf>,
}

/// Slices at one third, one half and three quarters of the axis
pub fn report_slice_indices(len: usize) -> [usize; 3] {
    let last = len.saturating_sub(1);
    [len / 3, len / 2, len * 3 / 4].map(|i| i.min(last))
}

/// Normalization shared by all tiles: original intensities scaled to 0..255
/// plus the label value times 255, rescaled by the maximum over the volume.
struct OverlayScale {
    orig_max: f32,
    total_max: f32,
}

impl OverlayScale {
    fn new(volume: &Array3<u16>, labels: &Array3<u8>) -> Self {
        let orig_max = f32::from(volume.iter().copied().max().unwrap_or(0));
        let total_max = volume
            .iter()
            .zip(labels.iter())
            .map(|(&v, &l)| combined(orig_max, v, l))
            .fold(0.0, f32::max);
        Self {
            orig_max,
            total_max,
        }
    }

    fn apply(&self, slice: ArrayView2<'_, u16>, labels: ArrayView2<'_, u8>) -> Array2<f32> {
        let mut out = Array2::zeros(slice.dim());
        if self.total_max <= 0.0 {
            return out;
        }
        ndarray::Zip::from(&mut out)
            .and(&slice)
            .and(&labels)
            .for_each(|o, &v, &l| *o = combined(self.orig_max, v, l) / self.total_max * 255.0);
        out
    }
}

fn combined(orig_max: f32, value: u16, label: u8) -> f32 {
    let orig = if orig_max > 0.0 {
        f32::from(value) / orig_max * 255.0
    } else {
        0.0
    };
    orig + f32::from(label) * 255.0
}

fn tile_image(overlay: &Array2<f32>) -> GrayImage {
    let resized = Interpolator::resize(&overlay.view(), TILE_WIDTH as usize, TILE_HEIGHT as usize);
    let pixels: Vec<u8> = resized.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8).collect();
    ImageBuffer::from_raw(TILE_WIDTH, TILE_HEIGHT, pixels)
        .unwrap_or_else(|| GrayImage::new(TILE_WIDTH, TILE_HEIGHT))
}

fn draw_bar(canvas: &mut RgbImage, top: u32, share: f64, color: Rgb<u8>) {
    let full = REPORT_SIZE - 2 * MARGIN;
    let length = (f64::from(full) * share.clamp(0.0, 1.0)).round() as u32;
    for y in top..top + BAR_HEIGHT {
        for x in MARGIN..MARGIN + length {
            canvas.put_pixel(x, y, color);
        }
    }
}

pub fn render_report(
    volume: &Volume,
    labels: &Array3<u8>,
    volumes: &HippocampusVolumes,
    options: &ReportOptions,
) -> Result<RenderedReport, ReportError> {
    if volume.dim() != labels.dim() {
        return Err(ReportError::ShapeMismatch {
            volume: volume.dim(),
            labels: labels.dim(),
        });
    }
    let len = volume.axis_len(options.orientation);
    if len == 0 {
        return Err(ReportError::EmptyVolume(options.orientation));
    }

    let slice_indices = report_slice_indices(len);
    let scale = OverlayScale::new(volume.data(), labels);

    let mut canvas = RgbImage::new(REPORT_SIZE, REPORT_SIZE);
    let (anterior_share, posterior_share) = volumes.shares();
    draw_bar(&mut canvas, 100, anterior_share, ANTERIOR_COLOR);
    draw_bar(&mut canvas, 100 + BAR_HEIGHT + 20, posterior_share, POSTERIOR_COLOR);

    if let Some(dir) = &options.images_dir {
        fs::create_dir_all(dir)?;
    }

    let mut tile_paths = Vec::new();
    for (n, &index) in slice_indices.iter().enumerate() {
        let (Some(slice), Some(label_slice)) = (
            slice_along(volume.data(), index, options.orientation),
            slice_along(labels, index, options.orientation),
        ) else {
            continue;
        };
        let tile = tile_image(&scale.apply(slice, label_slice));

        if let Some(dir) = &options.images_dir {
            let path = dir.join(format!(
                "{}_{}_{}_slice{index}.png",
                options.patient_id,
                options.timestamp.format("%Y%m%d"),
                options.timestamp.format("%H%M%S"),
            ));
            tile.save(&path)?;
            log::debug!("saved report tile {}", path.display());
            tile_paths.push(path);
        }

        let tile = DynamicImage::ImageLuma8(tile).to_rgb8();
        imageops::overlay(
            &mut canvas,
            &tile,
            i64::from(MARGIN) + TILE_STRIDE * n as i64,
            TILE_TOP,
        );
    }

    Ok(RenderedReport {
        image: canvas,
        slice_indices,
        tile_paths,
    })
}
