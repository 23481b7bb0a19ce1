use crate::{enums::SortBy, volume::Volume};

use dicom::{
    core::Tag,
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("No study directory found in {0}")]
    NoStudy(PathBuf),

    #[error("Expected exactly one series described as {description:?}, found {found}")]
    AmbiguousSeries { description: String, found: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// Series-level metadata taken from the first image, without its pixel data
#[derive(Debug, Clone)]
pub struct StudyHeader {
    pub dataset: InMemDicomObject,
}

impl StudyHeader {
    pub fn from_object(dicom_object: &FileDicomObject<InMemDicomObject>) -> Self {
        let mut dataset: InMemDicomObject = (**dicom_object).clone();
        dataset.remove_element(tags::PIXEL_DATA);
        Self { dataset }
    }

    pub fn patient_id(&self) -> String {
        string_value(&self.dataset, tags::PATIENT_ID).unwrap_or_default()
    }

    pub fn patient_name(&self) -> String {
        string_value(&self.dataset, tags::PATIENT_NAME).unwrap_or_default()
    }

    pub fn sop_instance_uid(&self) -> Option<String> {
        string_value(&self.dataset, tags::SOP_INSTANCE_UID)
    }

    pub fn images_in_acquisition(&self) -> Option<u32> {
        self.dataset
            .element(tags::IMAGES_IN_ACQUISITION)
            .ok()?
            .to_int::<u32>()
            .ok()
    }
}

pub(crate) fn string_value(dicom_object: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = dicom_object.element(tag).ok()?.to_str().ok()?;
    Some(value.trim().to_string())
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let mut images_with_order: Vec<_> = dicom_objects
            .iter()
            .filter_map(|dicom_object| Self::extract_image_with_order(dicom_object, &sort_by))
            .collect();

        if images_with_order.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::sort_images(&mut images_with_order, sort_by);

        let images: Vec<_> = images_with_order
            .into_iter()
            .map(|(_, image)| image)
            .collect();

        Self::validate_dimensions(&images)?;

        let volume_array = Self::build_volume_array(&images);
        let spacing = Self::get_spacing(dicom_objects).ok_or(VolumeLoaderError::MissingSpacing)?;

        log::debug!("stacked {} slices into {:?}", images.len(), volume_array.dim());
        Ok(Volume::new(volume_array, spacing))
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::load_from_file_paths(&paths, sort_by)
    }

    /// Most recently modified subdirectory of the routing folder
    pub fn latest_study_dir(routing_dir: impl AsRef<Path>) -> Result<PathBuf, VolumeLoaderError> {
        let routing_dir = routing_dir.as_ref();
        fs::read_dir(routing_dir)?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| {
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, entry.path()))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, path)| path)
            .ok_or_else(|| VolumeLoaderError::NoStudy(routing_dir.to_path_buf()))
    }

    /// Read every file in a study directory, skipping anything that is not DICOM
    pub fn read_study(
        study_dir: impl AsRef<Path>,
    ) -> Result<Vec<FileDicomObject<InMemDicomObject>>, VolumeLoaderError> {
        let mut paths: Vec<_> = fs::read_dir(study_dir.as_ref())?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.path())
            .collect();
        paths.sort();

        let objects: Vec<_> = paths
            .iter()
            .filter_map(|path| match open_file(path) {
                Ok(object) => Some(object),
                Err(err) => {
                    log::warn!("skipping {}: {err}", path.display());
                    None
                }
            })
            .collect();

        log::debug!(
            "read {} DICOM files from {}",
            objects.len(),
            study_dir.as_ref().display()
        );
        Ok(objects)
    }

    /// Keep the objects of the one series with the given description
    pub fn select_series(
        dicom_objects: Vec<FileDicomObject<InMemDicomObject>>,
        description: &str,
    ) -> Result<Vec<FileDicomObject<InMemDicomObject>>, VolumeLoaderError> {
        let selected: Vec<_> = dicom_objects
            .into_iter()
            .filter(|object| {
                string_value(object, tags::SERIES_DESCRIPTION).is_some_and(|d| d == description)
            })
            .collect();

        let mut series: Vec<_> = selected
            .iter()
            .map(|object| string_value(object, tags::SERIES_INSTANCE_UID))
            .collect();
        series.sort();
        series.dedup();

        if series.len() != 1 {
            return Err(VolumeLoaderError::AmbiguousSeries {
                description: description.to_string(),
                found: series.len(),
            });
        }
        Ok(selected)
    }

    fn extract_image_with_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<(Option<f32>, Array2<u16>)> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let image_2d = Self::decode_image(dicom_object)?;
        Some((order, image_2d))
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        // label series must keep their raw values
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn sort_images(images_with_order: &mut [(Option<f32>, Array2<u16>)], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            images_with_order
                .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        }

        if matches!(sort_by, SortBy::ImagePositionPatient) {
            images_with_order.reverse();
        }
    }

    fn validate_dimensions(images: &[Array2<u16>]) -> Result<(), VolumeLoaderError> {
        let first_dim = images[0].dim();
        if images.iter().any(|img| img.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(images: &[Array2<u16>]) -> Array3<u16> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<u16>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }

    fn get_spacing(dicom_objects: &[FileDicomObject<InMemDicomObject>]) -> Option<(f32, f32, f32)> {
        dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()?;

            let slice_thickness = dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()?
                .to_float32()
                .ok()?;

            // PixelSpacing is (row spacing, column spacing), i.e. (y, x)
            let [row, column, ..] = pixel_spacing.as_slice() else {
                return None;
            };
            Some((*column, *row, slice_thickness))
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{SliceFixture, write_slice};
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use std::fs;

    fn write_series(dir: &Path, series_uid: &str, description: &str, count: i32) {
        for instance in 1..=count {
            let fixture = SliceFixture {
                series_uid,
                description,
                instance,
                rows: 4,
                columns: 5,
                pixels: vec![instance as u16 * 10; 20],
            };
            write_slice(&dir.join(format!("{series_uid}-{instance}")), &fixture);
        }
    }

    #[test]
    fn selects_single_matching_series_and_loads_it() {
        let dir = tempfile::tempdir().unwrap();
        write_series(dir.path(), "1.2.3.1", "HippoCrop", 3);
        write_series(dir.path(), "1.2.3.2", "T1 full brain", 2);
        fs::write(dir.path().join("notes.txt"), b"not dicom").unwrap();

        let objects = VolumeLoader::read_study(dir.path()).unwrap();
        assert_eq!(objects.len(), 5);

        let series = VolumeLoader::select_series(objects, "HippoCrop").unwrap();
        assert_eq!(series.len(), 3);

        let header = StudyHeader::from_object(&series[0]);
        assert_eq!(header.patient_id(), "HIPPO-001");
        assert_eq!(header.images_in_acquisition(), Some(3));
        assert!(header.dataset.element(tags::PIXEL_DATA).is_err());

        let volume = VolumeLoader::load_from_dicom_objects(&series, SortBy::InstanceNumber).unwrap();
        assert_eq!(volume.dim(), (3, 4, 5));
        assert_eq!(volume.spacing, (1.0, 1.0, 2.0));
    }

    #[test]
    fn two_series_with_same_description_are_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        write_series(dir.path(), "1.2.3.1", "HippoCrop", 1);
        write_series(dir.path(), "1.2.3.9", "HippoCrop", 1);

        let objects = VolumeLoader::read_study(dir.path()).unwrap();
        let err = VolumeLoader::select_series(objects, "HippoCrop").unwrap_err();
        assert!(matches!(err, VolumeLoaderError::AmbiguousSeries { found: 2, .. }));
    }

    #[test]
    fn missing_series_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_series(dir.path(), "1.2.3.2", "T1 full brain", 1);

        let objects = VolumeLoader::read_study(dir.path()).unwrap();
        let err = VolumeLoader::select_series(objects, "HippoCrop").unwrap_err();
        assert!(matches!(err, VolumeLoaderError::AmbiguousSeries { found: 0, .. }));
    }

    #[test]
    fn latest_study_dir_requires_a_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stray.dcm"), b"").unwrap();
        assert!(matches!(
            VolumeLoader::latest_study_dir(dir.path()),
            Err(VolumeLoaderError::NoStudy(_))
        ));

        fs::create_dir(dir.path().join("study-a")).unwrap();
        let latest = VolumeLoader::latest_study_dir(dir.path()).unwrap();
        assert_eq!(latest, dir.path().join("study-a"));
    }

    fn single_slice(dir: &Path) -> FileDicomObject<InMemDicomObject> {
        let path = dir.join("slice.dcm");
        let fixture = SliceFixture {
            series_uid: "1.2.3.1",
            description: "HippoCrop",
            instance: 1,
            rows: 2,
            columns: 2,
            pixels: vec![0, 1, 2, 3],
        };
        write_slice(&path, &fixture);
        open_file(&path).unwrap()
    }

    fn with_pixel_spacing(
        mut object: FileDicomObject<InMemDicomObject>,
        values: &[&str],
    ) -> FileDicomObject<InMemDicomObject> {
        object.put(DataElement::new(
            tags::PIXEL_SPACING,
            VR::DS,
            PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect()),
        ));
        object
    }

    #[test]
    fn single_valued_pixel_spacing_is_missing_spacing() {
        let dir = tempfile::tempdir().unwrap();
        let object = with_pixel_spacing(single_slice(dir.path()), &["0.5"]);
        assert!(matches!(
            VolumeLoader::load_from_dicom_objects(&[object], SortBy::None),
            Err(VolumeLoaderError::MissingSpacing)
        ));
    }

    #[test]
    fn pixel_spacing_rows_map_to_y() {
        let dir = tempfile::tempdir().unwrap();
        let object = with_pixel_spacing(single_slice(dir.path()), &["0.5", "0.8"]);
        let volume = VolumeLoader::load_from_dicom_objects(&[object], SortBy::None).unwrap();
        assert_eq!(volume.spacing, (0.8, 0.5, 2.0));
    }

    #[test]
    fn label_values_survive_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let labels = vec![0, 1, 2, 2, 1, 0];
        let fixture = SliceFixture {
            series_uid: "1.2.3.7",
            description: "HippoLabels",
            instance: 1,
            rows: 2,
            columns: 3,
            pixels: labels.clone(),
        };
        write_slice(&dir.path().join("labels.dcm"), &fixture);

        let volume = VolumeLoader::load_from_directory(dir.path(), SortBy::InstanceNumber).unwrap();
        assert_eq!(volume.dim(), (1, 2, 3));
        assert_eq!(volume.data.iter().copied().collect::<Vec<_>>(), labels);
    }

    #[test]
    fn load_from_directory_without_dcm_files_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            VolumeLoader::load_from_directory(dir.path(), SortBy::None),
            Err(VolumeLoaderError::NoValidImages)
        ));
    }
}
