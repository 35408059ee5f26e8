use crate::deletion::{BatchDeleter, BatchDeletionConfig, DeletionHandle};
use crate::error::{Result, ShortenerError};
use crate::shortener::{ShortenParams, Shortened, Shortener};
use async_trait::async_trait;
use pinhole_core::{url, CreateOutcome, NewShortenedUrl, Repository, ShortKey, StorageError, UserId};
use pinhole_generator::Generator;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Attempts at a generated key before a `KeyConflict` is surfaced.
pub const MAX_KEY_ATTEMPTS: usize = 5;

/// A concrete implementation of the `Shortener` trait.
///
/// This service wraps a `Repository` and a `Generator` to handle:
/// - URL validation
/// - Correlation id synthesis
/// - Key allocation (custom, configured default, or generated with retries)
/// - Background batch deletion
///
/// The repository is the authority on uniqueness; a generated key is only a
/// candidate and is regenerated when the repository reports a conflict.
#[derive(Debug)]
pub struct ShortenerService<R, G> {
    repository: Arc<R>,
    generator: Arc<G>,
    default_key: Option<ShortKey>,
    deleter: BatchDeleter<R>,
}

impl<R, G> Clone for ShortenerService<R, G> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            generator: Arc::clone(&self.generator),
            default_key: self.default_key.clone(),
            deleter: self.deleter.clone(),
        }
    }
}

impl<R: Repository, G: Generator> ShortenerService<R, G> {
    pub fn new(repository: R, generator: G) -> Self {
        Self::with_deletion_config(repository, generator, BatchDeletionConfig::default())
    }

    pub fn with_deletion_config(
        repository: R,
        generator: G,
        deletion: BatchDeletionConfig,
    ) -> Self {
        let repository = Arc::new(repository);
        Self {
            deleter: BatchDeleter::new(Arc::clone(&repository), deletion),
            repository,
            generator: Arc::new(generator),
            default_key: None,
        }
    }

    /// Uses `key` for every request without a custom key instead of
    /// generating one.
    pub fn with_default_key(mut self, key: Option<ShortKey>) -> Self {
        self.default_key = key;
        self
    }

    pub fn deleter(&self) -> &BatchDeleter<R> {
        &self.deleter
    }

    async fn create(
        &self,
        key: ShortKey,
        correlation_id: &str,
        long_url: &str,
        user: &UserId,
    ) -> std::result::Result<CreateOutcome, StorageError> {
        self.repository
            .create(
                NewShortenedUrl {
                    key,
                    correlation_id: correlation_id.to_string(),
                    long_url: long_url.to_string(),
                },
                user,
            )
            .await
    }

    async fn create_with_generated_key(
        &self,
        correlation_id: &str,
        long_url: &str,
        user: &UserId,
    ) -> Result<CreateOutcome> {
        let mut attempt = 1;
        loop {
            let key = self.generator.generate().into();
            match self.create(key, correlation_id, long_url, user).await {
                Err(StorageError::KeyConflict(key)) if attempt < MAX_KEY_ATTEMPTS => {
                    debug!(key = %key, attempt, "generated key collided, regenerating");
                    attempt += 1;
                }
                other => return other.map_err(ShortenerError::from),
            }
        }
    }
}

#[async_trait]
impl<R: Repository, G: Generator> Shortener for ShortenerService<R, G> {
    async fn shorten(&self, params: ShortenParams, user: &UserId) -> Result<Shortened> {
        url::validate(&params.original_url)?;

        let correlation_id = params
            .correlation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let outcome = match params.custom_key.or_else(|| self.default_key.clone()) {
            Some(key) => self
                .create(key, &correlation_id, &params.original_url, user)
                .await
                .map_err(ShortenerError::from)?,
            None => {
                self.create_with_generated_key(&correlation_id, &params.original_url, user)
                    .await?
            }
        };

        Ok(Shortened {
            duplicate: outcome.is_duplicate(),
            key: outcome.into_key(),
            correlation_id,
        })
    }

    async fn resolve(&self, key: &ShortKey) -> Result<String> {
        match self.repository.get(key).await? {
            None => Err(ShortenerError::NotFound(key.to_string())),
            Some(record) if record.deleted => Err(ShortenerError::Gone(key.to_string())),
            Some(record) => Ok(record.long_url),
        }
    }

    async fn urls_for_user(&self, user: &UserId) -> Result<BTreeMap<ShortKey, String>> {
        Ok(self.repository.list_for_user(user).await?)
    }

    async fn delete(&self, key: &ShortKey, user: &UserId) -> Result<()> {
        Ok(self.repository.delete(key, user).await?)
    }

    fn delete_batch(&self, keys: Vec<ShortKey>, user: UserId) -> DeletionHandle {
        self.deleter.submit(keys, user)
    }

    async fn ping(&self) -> Result<()> {
        Ok(self.repository.ping().await?)
    }
}
