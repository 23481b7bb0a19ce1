use crate::enums::Orientation;

use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;

#[derive(Debug, Default, Clone)]
pub struct Volume {
    pub data: Array3<u16>,
    /// Voxel size in mm as (x, y, z): column spacing, row spacing, slice thickness
    pub spacing: (f32, f32, f32),
}

/// Slice of any (depth, height, width) array along an orientation
pub fn slice_along<A>(
    data: &Array3<A>,
    index: usize,
    orientation: Orientation,
) -> Option<ArrayView2<'_, A>> {
    let (depth, height, width) = data.dim();
    let view = match orientation {
        Orientation::Axial if index < depth => data.slice(s![index, .., ..]),
        Orientation::Coronal if index < height => data.slice(s![.., index, ..]),
        Orientation::Sagittal if index < width => data.slice(s![.., .., index]),
        _ => return None,
    };
    Some(view)
}

impl Volume {
    pub fn new(data: Array3<u16>, spacing: (f32, f32, f32)) -> Self {
        Self { data, spacing }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    pub fn voxel_volume_mm3(&self) -> f64 {
        let (x, y, z) = self.spacing;
        f64::from(x) * f64::from(y) * f64::from(z)
    }

    /// Number of slices along the given orientation
    pub fn axis_len(&self, orientation: Orientation) -> usize {
        let (depth, height, width) = self.dim();
        match orientation {
            Orientation::Axial => depth,
            Orientation::Coronal => height,
            Orientation::Sagittal => width,
        }
    }

    /// Intensities scaled into [0, 1] by the volume maximum
    pub fn normalized(&self) -> Array3<f32> {
        let max = self.data.iter().copied().max().unwrap_or(0);
        if max == 0 {
            return Array3::zeros(self.data.raw_dim());
        }
        let max = f32::from(max);
        let mut out = self.data.mapv(f32::from);
        out.par_mapv_inplace(|v| v / max);
        out
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ArrayView2<'_, u16>> {
        slice_along(&self.data, index, orientation)
    }
}
