//! Core types and traits for the Pinhole URL shortener.
//!
//! This crate provides the domain types shared by the storage engines, the
//! shortener service and the HTTP gateway: validated keys and URLs, the
//! persisted record shapes and the repository contract.

pub mod error;
pub mod key;
pub mod repository;
pub mod url;
pub mod user;

pub use error::{CoreError, StorageError};
pub use key::ShortKey;
pub use repository::{
    CreateOutcome, NewShortenedUrl, OwnershipAssociation, ReadRepository, Repository,
    ShortenedUrl,
};
pub use user::UserId;
