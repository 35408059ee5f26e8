//! Storage engines for shortened URLs.
//!
//! [`FileRepository`] keeps everything in memory and persists to two
//! line-delimited JSON journals. [`PostgresRepository`] is the relational
//! backend. Both implement the [`Repository`] contract from `pinhole-core`.

pub mod file;
pub mod journal;
pub mod postgres;

pub use file::{EngineStats, FileRepository, StoragePaths};
pub use journal::Journal;
pub use pinhole_core::error::StorageError;
pub use pinhole_core::repository::{
    CreateOutcome, NewShortenedUrl, OwnershipAssociation, ReadRepository, Repository,
    ShortenedUrl,
};
pub use postgres::PostgresRepository;
