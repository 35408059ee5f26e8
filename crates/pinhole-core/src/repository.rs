use crate::error::Result;
use crate::key::ShortKey;
use crate::user::UserId;
use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// A stored shortened URL.
///
/// Records are never physically removed; deleting one flips `deleted` and
/// leaves a tombstone that keeps its correlation id reserved forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortenedUrl {
    pub correlation_id: String,
    #[serde(rename = "short_url")]
    pub key: ShortKey,
    #[serde(rename = "original_url")]
    pub long_url: String,
    #[serde(rename = "is_deleted", default)]
    pub deleted: bool,
}

impl ShortenedUrl {
    pub fn is_active(&self) -> bool {
        !self.deleted
    }
}

/// Links a user to a shortened URL, by correlation id.
///
/// The first association recorded for a correlation id names the owner
/// allowed to delete it. Later ones only grant visibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipAssociation {
    #[serde(rename = "id")]
    pub association_id: Uuid,
    pub user_id: UserId,
    pub correlation_id: String,
    pub created_at: Timestamp,
}

impl OwnershipAssociation {
    pub fn new(user_id: UserId, correlation_id: impl Into<String>) -> Self {
        Self {
            association_id: Uuid::new_v4(),
            user_id,
            correlation_id: correlation_id.into(),
            created_at: Timestamp::now(),
        }
    }
}

/// A fully resolved create request: the key is already allocated and the
/// correlation id already synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShortenedUrl {
    pub key: ShortKey,
    pub correlation_id: String,
    pub long_url: String,
}

/// What a successful create did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new record was stored under this key.
    Created(ShortKey),
    /// The long URL was already shortened; the caller was attached to the
    /// existing record, whose key is returned.
    Duplicate(ShortKey),
}

impl CreateOutcome {
    pub fn key(&self) -> &ShortKey {
        match self {
            CreateOutcome::Created(key) | CreateOutcome::Duplicate(key) => key,
        }
    }

    pub fn into_key(self) -> ShortKey {
        match self {
            CreateOutcome::Created(key) | CreateOutcome::Duplicate(key) => key,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CreateOutcome::Duplicate(_))
    }
}

/// A read-only view of a repository.
#[async_trait]
pub trait ReadRepository: Send + Sync + 'static {
    /// Retrieves the record stored under `key`.
    ///
    /// Returns the active record if there is one, otherwise the most recent
    /// tombstone for that key, otherwise `None`.
    async fn get(&self, key: &ShortKey) -> Result<Option<ShortenedUrl>>;

    /// Returns every active URL visible to `user`, keyed by short key.
    async fn list_for_user(&self, user: &UserId) -> Result<BTreeMap<ShortKey, String>>;

    /// Checks that the backing store is reachable.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait Repository: ReadRepository {
    /// Stores a new record owned by `user`, or attaches `user` to the active
    /// record that already holds the same long URL.
    ///
    /// Returns `Err(CorrelationConflict)` if the correlation id was ever used
    /// and `Err(KeyConflict)` if an active record already holds the key.
    async fn create(&self, request: NewShortenedUrl, user: &UserId) -> Result<CreateOutcome>;

    /// Soft-deletes the record under `key` on behalf of `user`.
    ///
    /// Only the first user associated with the record may delete it. Deleting
    /// an already tombstoned key as its owner succeeds without doing anything.
    async fn delete(&self, key: &ShortKey, user: &UserId) -> Result<()>;
}

#[async_trait]
impl<T: ReadRepository + ?Sized> ReadRepository for Arc<T> {
    async fn get(&self, key: &ShortKey) -> Result<Option<ShortenedUrl>> {
        (**self).get(key).await
    }

    async fn list_for_user(&self, user: &UserId) -> Result<BTreeMap<ShortKey, String>> {
        (**self).list_for_user(user).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}

#[async_trait]
impl<T: Repository + ?Sized> Repository for Arc<T> {
    async fn create(&self, request: NewShortenedUrl, user: &UserId) -> Result<CreateOutcome> {
        (**self).create(request, user).await
    }

    async fn delete(&self, key: &ShortKey, user: &UserId) -> Result<()> {
        (**self).delete(key, user).await
    }
}
