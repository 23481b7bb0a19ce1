use ndarray::{ArrayBase, Data, Ix3};
use serde::Serialize;

use crate::enums::HippocampusLabel;
use crate::volume_loader::StudyHeader;

/// Voxel counts of the segmented hippocampal structures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HippocampusVolumes {
    pub anterior: usize,
    pub posterior: usize,
    pub total: usize,
}

/// The same counts converted into mm³
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhysicalVolumes {
    pub anterior_mm3: f64,
    pub posterior_mm3: f64,
    pub total_mm3: f64,
}

impl HippocampusVolumes {
    pub fn from_labels<S>(labels: &ArrayBase<S, Ix3>) -> Self
    where
        S: Data<Elem = u8>,
    {
        let count = |label: HippocampusLabel| labels.iter().filter(|&&v| v == label.value()).count();
        let anterior = count(HippocampusLabel::Anterior);
        let posterior = count(HippocampusLabel::Posterior);
        Self {
            anterior,
            posterior,
            total: anterior + posterior,
        }
    }

    pub fn in_mm3(&self, voxel_volume: f64) -> PhysicalVolumes {
        PhysicalVolumes {
            anterior_mm3: self.anterior as f64 * voxel_volume,
            posterior_mm3: self.posterior as f64 * voxel_volume,
            total_mm3: self.total as f64 * voxel_volume,
        }
    }

    /// Share of the total taken by each structure, (anterior, posterior)
    pub fn shares(&self) -> (f64, f64) {
        if self.total == 0 {
            return (0.0, 0.0);
        }
        let total = self.total as f64;
        (self.anterior as f64 / total, self.posterior as f64 / total)
    }

    pub fn summary_lines(&self, header: &StudyHeader, slice_indices: &[usize]) -> Vec<String> {
        let images = header
            .images_in_acquisition()
            .map_or_else(|| "unknown".to_string(), |n| n.to_string());
        vec![
            format!("Patient ID: {}", header.patient_id()),
            format!("Total Images: {images}"),
            format!("Slices: {slice_indices:?}"),
            format!("Calculated Total Volume: {}", self.total),
            format!("Calculated Anterior Volume: {}", self.anterior),
            format!("Calculated Posterior Volume: {}", self.posterior),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn labels() -> Array3<u8> {
        let mut labels = Array3::zeros((2, 3, 3));
        labels[[0, 0, 0]] = 1;
        labels[[0, 1, 1]] = 1;
        labels[[1, 2, 2]] = 2;
        labels[[1, 0, 2]] = 2;
        labels[[1, 1, 2]] = 2;
        labels[[1, 1, 1]] = 7;
        labels
    }

    #[test]
    fn counts_voxels_per_structure() {
        let volumes = HippocampusVolumes::from_labels(&labels());
        assert_eq!(
            volumes,
            HippocampusVolumes {
                anterior: 2,
                posterior: 3,
                total: 5,
            }
        );
    }

    #[test]
    fn converts_to_physical_volume() {
        let volumes = HippocampusVolumes::from_labels(&labels());
        let mm3 = volumes.in_mm3(0.5);
        assert_eq!(mm3.anterior_mm3, 1.0);
        assert_eq!(mm3.posterior_mm3, 1.5);
        assert_eq!(mm3.total_mm3, 2.5);
    }

    #[test]
    fn shares_of_empty_prediction_are_zero() {
        assert_eq!(HippocampusVolumes::default().shares(), (0.0, 0.0));
        let volumes = HippocampusVolumes::from_labels(&labels());
        assert_eq!(volumes.shares(), (0.4, 0.6));
    }
}
