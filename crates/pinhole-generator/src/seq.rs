use crate::Generator;
use pinhole_core::ShortKey;
use std::sync::atomic::{AtomicU64, Ordering};

/// A short key generator using a sequential counter.
///
/// Produces keys like "pin000000", "pin000001", etc. Keys are unique within a
/// single instance but not across restarts; the storage engine rejects a
/// replayed key still held by an active record and the caller retries.
#[derive(Debug)]
pub struct SeqGenerator {
    counter: AtomicU64,
    prefix: String,
}

impl Clone for SeqGenerator {
    fn clone(&self) -> Self {
        Self {
            counter: AtomicU64::new(self.counter.load(Ordering::SeqCst)),
            prefix: self.prefix.clone(),
        }
    }
}

impl SeqGenerator {
    /// Creates a new sequential generator with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::with_offset(prefix, 0)
    }

    /// Creates a new sequential generator starting from a specific counter value.
    ///
    /// Useful for resuming after a restart, e.g. with the number of records
    /// replayed from the log.
    pub fn with_offset(prefix: impl Into<String>, offset: u64) -> Self {
        Self {
            counter: AtomicU64::new(offset),
            prefix: prefix.into(),
        }
    }
}

impl Generator for SeqGenerator {
    type Output = ShortKey;

    fn generate(&self) -> Self::Output {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        ShortKey::new_unchecked(format!("{}{:06}", self.prefix, count))
    }
}
