use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Axial,
    Coronal,
    Sagittal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    ImagePositionPatient,
    TablePosition,
    #[default]
    InstanceNumber,
    None,
}

/// Classes produced by the hippocampus segmentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HippocampusLabel {
    Background = 0,
    Anterior = 1,
    Posterior = 2,
}

impl HippocampusLabel {
    pub const fn value(self) -> u8 {
        self as u8
    }
}
