//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services. Nothing
//! in this crate reads process environment variables during request handling.

use crate::constants::DEFAULT_RESEARCHES_DIR;
use crate::{ResearchError, ResearchResult};
use ctmark_storage::{DEFAULT_PATH_CACHE_CAPACITY, DEFAULT_UPLOAD_CHUNK_SIZE};
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    researches_dir: PathBuf,
    path_cache_capacity: u64,
    upload_chunk_size: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ResearchError::InvalidInput`] if the path cache capacity or the upload chunk
    /// size is zero.
    pub fn new(
        researches_dir: PathBuf,
        path_cache_capacity: u64,
        upload_chunk_size: usize,
    ) -> ResearchResult<Self> {
        if path_cache_capacity == 0 {
            return Err(ResearchError::InvalidInput(
                "path_cache_capacity must be greater than zero".into(),
            ));
        }
        if upload_chunk_size == 0 {
            return Err(ResearchError::InvalidInput(
                "upload_chunk_size must be greater than zero".into(),
            ));
        }

        Ok(Self {
            researches_dir,
            path_cache_capacity,
            upload_chunk_size,
        })
    }

    /// Configuration with default tuning for the given storage root.
    pub fn with_researches_dir(researches_dir: PathBuf) -> Self {
        Self {
            researches_dir,
            path_cache_capacity: DEFAULT_PATH_CACHE_CAPACITY,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
        }
    }

    pub fn researches_dir(&self) -> &Path {
        &self.researches_dir
    }

    pub fn path_cache_capacity(&self) -> u64 {
        self.path_cache_capacity
    }

    pub fn upload_chunk_size(&self) -> usize {
        self.upload_chunk_size
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::with_researches_dir(PathBuf::from(DEFAULT_RESEARCHES_DIR))
    }
}

/// Parses an optional numeric override, falling back to `default` when absent.
///
/// Binaries use this to turn raw environment values into configuration before calling
/// [`CoreConfig::new`].
pub fn parse_override<T: std::str::FromStr>(
    name: &str,
    raw: Option<&str>,
    default: T,
) -> ResearchResult<T> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value.parse().map_err(|_| {
            ResearchError::InvalidInput(format!("{name} is not a valid number: {value}"))
        }),
    }
}
