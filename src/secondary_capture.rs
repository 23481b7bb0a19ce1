use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use image::RgbImage;
use thiserror::Error;
use uuid::Uuid;

use crate::volume_loader::StudyHeader;

/// Root used for generated UIDs unless configured otherwise
pub const DEFAULT_UID_ROOT: &str = "1.2.826.0.1.3680043.8.498";

const MAX_UID_LEN: usize = 64;
const MIN_UID_SUFFIX_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum SecondaryCaptureError {
    #[error("report image of {width}x{height} does not fit DICOM rows/columns")]
    ImageTooLarge { width: u32, height: u32 },

    #[error("invalid UID root {0:?}")]
    InvalidUidRoot(String),

    #[error("could not build file meta group: {0}")]
    Meta(#[from] dicom::object::WithMetaError),

    #[error("could not write report: {0}")]
    Write(#[from] dicom::object::WriteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SecondaryCaptureOptions {
    pub series_description: String,
    pub uid_root: String,
    pub timestamp: DateTime<Local>,
}

impl Default for SecondaryCaptureOptions {
    fn default() -> Self {
        Self {
            series_description: "HippoVolume.AI".to_string(),
            uid_root: DEFAULT_UID_ROOT.to_string(),
            timestamp: Local::now(),
        }
    }
}

/// A new UID under `root`, filled up to 64 characters with digits of a random UUID
pub fn generate_uid(root: &str) -> Result<String, SecondaryCaptureError> {
    let valid_root = !root.is_empty()
        && root
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
    let available = MAX_UID_LEN.saturating_sub(root.len() + 1);
    if !valid_root || available < MIN_UID_SUFFIX_LEN {
        return Err(SecondaryCaptureError::InvalidUidRoot(root.to_string()));
    }

    let suffix = Uuid::new_v4().as_u128().to_string();
    let suffix = &suffix[..suffix.len().min(available)];
    Ok(format!("{root}.{suffix}"))
}

fn put_str(object: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    object.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

fn put_u16(object: &mut InMemDicomObject, tag: Tag, value: u16) {
    object.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
}

/// Builds a Secondary Capture object carrying the report as burned-in RGB pixels.
///
/// Patient and study attributes come from the inferred series' header; the
/// report becomes a new single-image series.
pub fn build_report_object(
    header: &StudyHeader,
    report: &RgbImage,
    comments: &[String],
    options: &SecondaryCaptureOptions,
) -> Result<FileDicomObject<InMemDicomObject>, SecondaryCaptureError> {
    let (width, height) = report.dimensions();
    let (Ok(columns), Ok(rows)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(SecondaryCaptureError::ImageTooLarge { width, height });
    };

    let sop_instance_uid = generate_uid(&options.uid_root)?;
    let series_instance_uid = generate_uid(&options.uid_root)?;
    let date = options.timestamp.format("%Y%m%d").to_string();
    let time = options.timestamp.format("%H%M%S").to_string();

    let mut out = header.dataset.clone();
    put_str(&mut out, tags::SOP_CLASS_UID, VR::UI, uids::SECONDARY_CAPTURE_IMAGE_STORAGE);
    put_str(&mut out, tags::SOP_INSTANCE_UID, VR::UI, &sop_instance_uid);
    put_str(&mut out, tags::SERIES_INSTANCE_UID, VR::UI, &series_instance_uid);
    put_str(&mut out, tags::MODALITY, VR::CS, "OT");
    put_str(&mut out, tags::SERIES_DESCRIPTION, VR::LO, &options.series_description);
    put_str(&mut out, tags::IMAGE_TYPE, VR::CS, "DERIVED\\PRIMARY\\AXIAL");

    put_u16(&mut out, tags::ROWS, rows);
    put_u16(&mut out, tags::COLUMNS, columns);
    put_u16(&mut out, tags::SAMPLES_PER_PIXEL, 3);
    put_str(&mut out, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "RGB");
    // R1G1B1R2G2B2...
    put_u16(&mut out, tags::PLANAR_CONFIGURATION, 0);
    put_u16(&mut out, tags::BITS_ALLOCATED, 8);
    put_u16(&mut out, tags::BITS_STORED, 8);
    put_u16(&mut out, tags::HIGH_BIT, 7);
    put_u16(&mut out, tags::PIXEL_REPRESENTATION, 0);
    out.remove_element(tags::NUMBER_OF_FRAMES);

    put_str(&mut out, tags::STUDY_DATE, VR::DA, &date);
    put_str(&mut out, tags::STUDY_TIME, VR::TM, &time);
    put_str(&mut out, tags::SERIES_DATE, VR::DA, &date);
    put_str(&mut out, tags::SERIES_TIME, VR::TM, &time);

    put_str(&mut out, tags::IMAGES_IN_ACQUISITION, VR::IS, "1");
    // viewers fall back to automatic windowing
    out.put(DataElement::new(tags::WINDOW_CENTER, VR::DS, PrimitiveValue::Empty));
    out.put(DataElement::new(tags::WINDOW_WIDTH, VR::DS, PrimitiveValue::Empty));
    out.remove_element(tags::RESCALE_INTERCEPT);
    out.remove_element(tags::RESCALE_SLOPE);
    // the summary lives in ImageComments, not in the pixels
    put_str(&mut out, tags::BURNED_IN_ANNOTATION, VR::CS, "NO");
    put_str(&mut out, tags::IMAGE_COMMENTS, VR::LT, &comments.join("\r\n"));

    out.put(DataElement::new(
        tags::PIXEL_DATA,
        VR::OB,
        PrimitiveValue::from(report.as_raw().clone()),
    ));

    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .media_storage_sop_class_uid(uids::SECONDARY_CAPTURE_IMAGE_STORAGE)
        .media_storage_sop_instance_uid(sop_instance_uid.as_str());
    Ok(out.with_meta(meta)?)
}

/// Builds the report object and writes it to `path`
pub fn write_report(
    path: impl AsRef<Path>,
    header: &StudyHeader,
    report: &RgbImage,
    comments: &[String],
    options: &SecondaryCaptureOptions,
) -> Result<(), SecondaryCaptureError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let object = build_report_object(header, report, comments, options)?;
    object.write_to_file(path)?;
    log::info!("report written to {}", path.display());
    Ok(())
}
