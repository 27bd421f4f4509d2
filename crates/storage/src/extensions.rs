//! Filename classification.
//!
//! Each predicate compares the extension of the last path component against a fixed value.
//! Matching is case-sensitive and exact; a missing extension never matches.

use crate::constants::{ARCHIVE_EXTENSION, CAPTURE_EXTENSION, MARKUP_EXTENSION};
use std::path::Path;

/// Returns true for DICOM capture files (`.dcm`).
pub fn is_capture_format(filename: &str) -> bool {
    extension(filename) == Some(CAPTURE_EXTENSION)
}

/// Returns true for capture archives (`.zip`).
pub fn is_archive_format(filename: &str) -> bool {
    extension(filename) == Some(ARCHIVE_EXTENSION)
}

/// Returns true for markup payloads (`.json`).
pub fn is_markup_format(filename: &str) -> bool {
    extension(filename) == Some(MARKUP_EXTENSION)
}

// Dot-files such as `.dcm` have no extension, matching `Path::extension`.
fn extension(filename: &str) -> Option<&str> {
    Path::new(filename).extension().and_then(|ext| ext.to_str())
}
