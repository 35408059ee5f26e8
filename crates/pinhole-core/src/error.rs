use thiserror::Error;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Validation errors raised before anything reaches a repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid short key: {0}")]
    InvalidShortKey(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("correlation id already exists: {0}")]
    CorrelationConflict(String),
    #[error("short key already in use: {0}")]
    KeyConflict(String),
    #[error("short key not found: {0}")]
    NotFound(String),
    #[error("short key {key} is not owned by {user}")]
    NotOwner { key: String, user: String },
    #[error("failed to persist state: {0}")]
    Persistence(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Persistence(err.to_string())
    }
}
