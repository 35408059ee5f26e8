//! URL shortener service implementation.
//!
//! This crate orchestrates the storage engine: it validates input, allocates
//! keys and runs bulk deletions on a bounded worker pool. Core types are
//! re-exported from `pinhole_core`.

pub mod deletion;
pub mod error;
pub mod service;
pub mod shortener;

pub use deletion::{BatchDeleter, BatchDeletionConfig, DeletionHandle, DeletionReport};
pub use error::ShortenerError;
pub use service::ShortenerService;
pub use shortener::{ShortenParams, Shortened, Shortener};
