use ctmark_storage::StorageError;
use ctmark_uuid::UuidError;

#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("wrong files format")]
    WrongFilesFormat,
    #[error("access denied")]
    AccessDenied,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<UuidError> for ResearchError {
    fn from(err: UuidError) -> Self {
        let UuidError::InvalidInput(message) = err;
        ResearchError::InvalidInput(message)
    }
}

pub type ResearchResult<T> = std::result::Result<T, ResearchError>;
