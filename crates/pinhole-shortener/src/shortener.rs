use crate::deletion::DeletionHandle;
use crate::error::Result;
use async_trait::async_trait;
use pinhole_core::{ShortKey, UserId};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct ShortenParams {
    /// The original URL to be shortened.
    pub original_url: String,
    /// Client-supplied correlation id. A fresh UUID is used when absent or blank.
    pub correlation_id: Option<String>,
    /// Optional custom key for the shortened URL.
    pub custom_key: Option<ShortKey>,
}

impl ShortenParams {
    pub fn new(original_url: impl Into<String>) -> Self {
        Self {
            original_url: original_url.into(),
            ..Self::default()
        }
    }
}

/// Result of a successful `shorten` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortened {
    pub key: ShortKey,
    /// The correlation id the request was made under, supplied or synthesized.
    pub correlation_id: String,
    /// The long URL was already shortened and `key` is the existing key.
    pub duplicate: bool,
}

#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens a URL on behalf of `user`.
    async fn shorten(&self, params: ShortenParams, user: &UserId) -> Result<Shortened>;

    /// Resolves a key to its long URL. Deleted keys fail with `Gone`.
    async fn resolve(&self, key: &ShortKey) -> Result<String>;

    /// Active URLs associated with `user`, keyed by short key.
    async fn urls_for_user(&self, user: &UserId) -> Result<BTreeMap<ShortKey, String>>;

    /// Soft-deletes a single key owned by `user`.
    async fn delete(&self, key: &ShortKey, user: &UserId) -> Result<()>;

    /// Schedules deletion of `keys` in the background and returns at once.
    fn delete_batch(&self, keys: Vec<ShortKey>, user: UserId) -> DeletionHandle;

    /// Checks that the storage backend is reachable.
    async fn ping(&self) -> Result<()>;
}
