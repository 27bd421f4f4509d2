//! Folder names, filenames and extensions of the research layout.

/// Folder holding the numbered capture files of a research.
pub const CAPTURES_FOLDER_NAME: &str = "captures";

/// Annotation payload of a research.
pub const MARKUP_FILENAME: &str = "markup.json";

/// Derived raster preview of a research.
pub const PREVIEW_FILENAME: &str = "preview.jpg";

/// Extension of capture files (DICOM).
pub const CAPTURE_EXTENSION: &str = "dcm";

/// Extension of capture archives.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Extension of markup uploads.
pub const MARKUP_EXTENSION: &str = "json";

/// Chunk size used when streaming an uploaded archive to disk (5 MiB).
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Maximum number of memoised research paths.
pub const DEFAULT_PATH_CACHE_CAPACITY: u64 = 256;
