//! DICOM capture codec.
//!
//! Captures are DICOM files. This module implements the two operations the storage manager
//! performs on them after ingestion:
//!
//! - [`Depersonalizer`]: clear the patient identifying attributes in place.
//! - [`PreviewRenderer`]: render the pixel data to a JPEG through the `bone` colormap.
//!
//! Both are synchronous; callers run them on a blocking worker.

use crate::{StorageError, StorageResult};
use dicom_core::value::Value;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::{open_file, InMemDicomObject};
use image::{ImageFormat, Rgb, RgbImage};
use std::fmt::Display;
use std::path::Path;

/// Patient attributes cleared by depersonalization.
const IDENTIFYING_ATTRIBUTES: [(Tag, VR); 4] = [
    (tags::PATIENT_NAME, VR::PN),
    (tags::PATIENT_ID, VR::LO),
    (tags::PATIENT_SEX, VR::CS),
    (tags::PATIENT_BIRTH_DATE, VR::DA),
];

/// Value of Patient Identity Removed (0012,0062). CS values are space padded to even length.
const IDENTITY_REMOVED: &str = "YES ";

/// Removes patient identifying attributes from one capture, in place.
///
/// Implementations must be idempotent: scrubbing an already scrubbed capture leaves it
/// unchanged.
pub trait Depersonalizer: Send + Sync {
    fn depersonalize(&self, capture: &Path) -> StorageResult<()>;
}

/// Renders a raster preview of one capture to `target`, overwriting it.
pub trait PreviewRenderer: Send + Sync {
    fn render_preview(&self, capture: &Path, target: &Path) -> StorageResult<()>;
}

/// [`Depersonalizer`] and [`PreviewRenderer`] for DICOM captures.
#[derive(Clone, Copy, Debug, Default)]
pub struct DicomCodec;

impl Depersonalizer for DicomCodec {
    fn depersonalize(&self, capture: &Path) -> StorageResult<()> {
        let mut object = open_file(capture).map_err(|e| codec_error(capture, e))?;

        for (tag, vr) in IDENTIFYING_ATTRIBUTES {
            object.put(DataElement::new(tag, vr, PrimitiveValue::Empty));
        }
        object.put(DataElement::new(
            tags::PATIENT_IDENTITY_REMOVED,
            VR::CS,
            PrimitiveValue::from(IDENTITY_REMOVED),
        ));

        object
            .write_to_file(capture)
            .map_err(|e| codec_error(capture, e))
    }
}

impl PreviewRenderer for DicomCodec {
    fn render_preview(&self, capture: &Path, target: &Path) -> StorageResult<()> {
        let object = open_file(capture).map_err(|e| codec_error(capture, e))?;
        let frame = GreyFrame::decode(&object, capture)?;

        frame
            .to_bone_image()
            .save_with_format(target, ImageFormat::Jpeg)
            .map_err(|e| codec_error(target, e))
    }
}

/// First frame of a single-sample image, as raw sample values.
struct GreyFrame {
    rows: u32,
    columns: u32,
    samples: Vec<f32>,
}

impl GreyFrame {
    fn decode(object: &InMemDicomObject, path: &Path) -> StorageResult<Self> {
        let rows = read_u16(object, tags::ROWS, path)?;
        let columns = read_u16(object, tags::COLUMNS, path)?;
        let bits_allocated = read_u16(object, tags::BITS_ALLOCATED, path)?;
        let samples_per_pixel =
            read_optional_u16(object, tags::SAMPLES_PER_PIXEL, path)?.unwrap_or(1);
        let signed =
            read_optional_u16(object, tags::PIXEL_REPRESENTATION, path)?.unwrap_or(0) == 1;

        if rows == 0 || columns == 0 {
            return Err(StorageError::UnsupportedPixelData(format!(
                "empty image ({}x{})",
                columns, rows
            )));
        }
        if samples_per_pixel != 1 {
            return Err(StorageError::UnsupportedPixelData(format!(
                "{} samples per pixel",
                samples_per_pixel
            )));
        }

        let pixel_data = object
            .element(tags::PIXEL_DATA)
            .map_err(|e| codec_error(path, e))?;
        if matches!(pixel_data.value(), Value::PixelSequence { .. }) {
            return Err(StorageError::UnsupportedPixelData(
                "encapsulated (compressed) pixel data".into(),
            ));
        }
        let bytes = pixel_data.to_bytes().map_err(|e| codec_error(path, e))?;

        let pixel_count = usize::from(rows) * usize::from(columns);
        let bytes_per_sample = match bits_allocated {
            8 => 1,
            16 => 2,
            other => {
                return Err(StorageError::UnsupportedPixelData(format!(
                    "{} bits allocated",
                    other
                )))
            }
        };
        if bytes.len() < pixel_count * bytes_per_sample {
            return Err(StorageError::UnsupportedPixelData(format!(
                "pixel data holds {} bytes, {}x{} image needs {}",
                bytes.len(),
                columns,
                rows,
                pixel_count * bytes_per_sample
            )));
        }

        let samples: Vec<f32> = match (bytes_per_sample, signed) {
            (1, false) => bytes[..pixel_count].iter().map(|&b| f32::from(b)).collect(),
            (1, true) => bytes[..pixel_count]
                .iter()
                .map(|&b| f32::from(b as i8))
                .collect(),
            (_, false) => bytes
                .chunks_exact(2)
                .take(pixel_count)
                .map(|c| f32::from(u16::from_le_bytes([c[0], c[1]])))
                .collect(),
            (_, true) => bytes
                .chunks_exact(2)
                .take(pixel_count)
                .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])))
                .collect(),
        };

        Ok(Self {
            rows: u32::from(rows),
            columns: u32::from(columns),
            samples,
        })
    }

    /// Min-max normalises the samples and maps them through [`bone_colormap`].
    fn to_bone_image(&self) -> RgbImage {
        let (min, max) = self
            .samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;

        RgbImage::from_fn(self.columns, self.rows, |x, y| {
            let value = self.samples[(y * self.columns + x) as usize];
            let level = if range > 0.0 { (value - min) / range } else { 0.0 };
            Rgb(bone_colormap(level))
        })
    }
}

// Piecewise-linear control points (position, intensity) of the bone colormap, per channel.
const BONE_RED: [(f32, f32); 3] = [(0.0, 0.0), (0.746032, 0.652778), (1.0, 1.0)];
const BONE_GREEN: [(f32, f32); 4] = [
    (0.0, 0.0),
    (0.365079, 0.319444),
    (0.746032, 0.777778),
    (1.0, 1.0),
];
const BONE_BLUE: [(f32, f32); 3] = [(0.0, 0.0), (0.365079, 0.444444), (1.0, 1.0)];

/// Maps a normalised intensity in `[0, 1]` to RGB using the `bone` colormap (greyscale with a
/// blue tint). Values outside the range are clamped.
pub fn bone_colormap(level: f32) -> [u8; 3] {
    let level = if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    };
    [
        channel(&BONE_RED, level),
        channel(&BONE_GREEN, level),
        channel(&BONE_BLUE, level),
    ]
}

fn channel(points: &[(f32, f32)], level: f32) -> u8 {
    let intensity = points
        .windows(2)
        .find(|w| level <= w[1].0)
        .map(|w| {
            let (x0, y0) = w[0];
            let (x1, y1) = w[1];
            y0 + (y1 - y0) * (level - x0) / (x1 - x0)
        })
        .unwrap_or(1.0);
    (intensity * 255.0).round().clamp(0.0, 255.0) as u8
}

fn read_u16(object: &InMemDicomObject, tag: Tag, path: &Path) -> StorageResult<u16> {
    object
        .element(tag)
        .map_err(|e| codec_error(path, e))?
        .to_int::<u16>()
        .map_err(|e| codec_error(path, e))
}

fn read_optional_u16(
    object: &InMemDicomObject,
    tag: Tag,
    path: &Path,
) -> StorageResult<Option<u16>> {
    match object.element_opt(tag).map_err(|e| codec_error(path, e))? {
        Some(element) => element
            .to_int::<u16>()
            .map(Some)
            .map_err(|e| codec_error(path, e)),
        None => Ok(None),
    }
}

fn codec_error(path: &Path, error: impl Display) -> StorageError {
    StorageError::Codec {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}
