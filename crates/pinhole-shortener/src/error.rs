use pinhole_core::{CoreError, StorageError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShortenerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid short key: {0}")]
    InvalidShortKey(String),
    #[error("correlation id already exists: {0}")]
    CorrelationConflict(String),
    #[error("short key already in use: {0}")]
    KeyConflict(String),
    #[error("short key not found: {0}")]
    NotFound(String),
    #[error("short key has been deleted: {0}")]
    Gone(String),
    #[error("short key {key} is not owned by {user}")]
    NotOwner { key: String, user: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<CoreError> for ShortenerError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortKey(message) => Self::InvalidShortKey(message),
            CoreError::InvalidUrl(message) => Self::InvalidUrl(message),
        }
    }
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::CorrelationConflict(id) => Self::CorrelationConflict(id),
            StorageError::KeyConflict(key) => Self::KeyConflict(key),
            StorageError::NotFound(key) => Self::NotFound(key),
            StorageError::NotOwner { key, user } => Self::NotOwner { key, user },
            other => Self::Storage(other.to_string()),
        }
    }
}
