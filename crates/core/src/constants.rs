//! Constants used throughout the ctmark core crate.

/// Default directory for research storage when no explicit directory is configured.
pub const DEFAULT_RESEARCHES_DIR: &str = "researches";

/// Default bind address of the REST server.
pub const DEFAULT_REST_ADDR: &str = "0.0.0.0:3000";

/// Environment variable naming the research storage root.
pub const RESEARCHES_DIR_ENV: &str = "RESEARCHES_DIR";

/// Environment variable overriding the path cache capacity.
pub const PATH_CACHE_CAPACITY_ENV: &str = "CTMARK_PATH_CACHE_CAPACITY";

/// Environment variable overriding the archive upload chunk size, in bytes.
pub const UPLOAD_CHUNK_SIZE_ENV: &str = "CTMARK_UPLOAD_CHUNK_SIZE";

/// Environment variable overriding the REST bind address.
pub const REST_ADDR_ENV: &str = "CTMARK_REST_ADDR";
