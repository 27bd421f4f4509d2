//! ctmark research storage
//!
//! This crate owns the on-disk representation of researches: sets of CT capture files plus
//! their markup and a derived preview image.
//!
//! ## Storage Layout
//!
//! ```text
//! <root>/
//! └── <id[0..2]>/                 # shard prefix
//!     └── <research_id>/
//!         ├── captures/
//!         │   ├── 1.dcm
//!         │   └── … N.dcm         # contiguous, in ingestion order
//!         ├── markup.json         # empty until uploaded
//!         └── preview.jpg         # empty until generated
//! ```
//!
//! ## Components
//!
//! - [`extensions`]: filename classification (capture / archive / markup)
//! - [`UploadedFile`]: the upload source handed in by the HTTP layer
//! - [`ingest`]: list and archive ingestion strategies behind the [`Ingestor`] trait
//! - [`codec`]: DICOM depersonalization and preview rendering behind [`Depersonalizer`] and
//!   [`PreviewRenderer`]
//! - [`ResearchPaths`]: bounded, invalidatable path resolution
//! - [`ResearchStorage`]: the single entry point composing all of the above
//!
//! Operations on a research that does not exist return `None` rather than an error. I/O and
//! codec failures propagate as [`StorageError`].
//!
//! ## Example Usage
//!
//! ```no_run
//! use ctmark_storage::{ResearchStorage, UploadedFile};
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), ctmark_storage::StorageError> {
//! let storage = ResearchStorage::new(Path::new("researches"));
//! let id = storage.create_empty(None).await?;
//!
//! let files = vec![UploadedFile::from_bytes("1.dcm", std::fs::read("slice.dcm")?)];
//! if let Some(count) = storage.load_captures(&id, files).await? {
//!     println!("{count} captures stored");
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod constants;
pub mod extensions;
pub mod ingest;
mod paths;
mod storage;
mod upload;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::{bone_colormap, Depersonalizer, DicomCodec, PreviewRenderer};
pub use constants::{
    ARCHIVE_EXTENSION, CAPTURES_FOLDER_NAME, CAPTURE_EXTENSION, DEFAULT_PATH_CACHE_CAPACITY,
    DEFAULT_UPLOAD_CHUNK_SIZE, MARKUP_EXTENSION, MARKUP_FILENAME, PREVIEW_FILENAME,
};
pub use ctmark_uuid::ResearchId;
pub use ingest::{CaptureIngestor, IngestStrategy, Ingestor};
pub use paths::ResearchPaths;
pub use storage::ResearchStorage;
pub use upload::UploadedFile;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The uploaded archive could not be read as a zip container
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A capture could not be decoded, modified or re-encoded
    #[error("Codec error ({path}): {message}", path = path.display())]
    Codec {
        path: std::path::PathBuf,
        message: String,
    },

    /// The capture's pixel data is in a layout the preview renderer does not handle
    #[error("Unsupported pixel data: {0}")]
    UnsupportedPixelData(String),

    /// A blocking worker task failed to complete
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Identifier error from ctmark-uuid
    #[error("UUID error: {0}")]
    Uuid(#[from] ctmark_uuid::UuidError),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
