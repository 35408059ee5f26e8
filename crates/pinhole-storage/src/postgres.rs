use async_trait::async_trait;
use pinhole_core::error::{Result, StorageError};
use pinhole_core::repository::{
    CreateOutcome, NewShortenedUrl, OwnershipAssociation, ReadRepository, Repository,
    ShortenedUrl,
};
use pinhole_core::{ShortKey, UserId};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::BTreeMap;
use tracing::debug;

const SCHEMA: &str = include_str!("../ddl/postgres/short_urls.sql");

const PRIMARY_KEY: &str = "short_urls_pkey";
const ACTIVE_KEY_INDEX: &str = "short_urls_active_key";
const ACTIVE_URL_INDEX: &str = "short_urls_active_url";

/// Attempts before giving up on a create that keeps losing the race for a
/// long URL to concurrent writers.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// PostgreSQL implementation of the repository contract.
///
/// Soft delete is implemented with `is_deleted`. Uniqueness of keys and long
/// URLs among active records is enforced by partial unique indexes, so a
/// tombstoned key or URL can be reused while its correlation id cannot. The
/// owner of a record is its earliest row in `url_owners`.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a repository from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a repository by opening a new connection pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Creates the tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs one create in its own transaction. `None` means a concurrent
    /// writer claimed the same long URL first and the create should be retried.
    async fn try_create(
        &self,
        request: &NewShortenedUrl,
        user: &UserId,
    ) -> Result<Option<CreateOutcome>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let taken = sqlx::query("SELECT 1 FROM short_urls WHERE correlation_id = $1")
            .bind(&request.correlation_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .is_some();
        if taken {
            return Err(StorageError::CorrelationConflict(
                request.correlation_id.clone(),
            ));
        }

        let existing = sqlx::query(
            r#"
            SELECT correlation_id, short_key
            FROM short_urls
            WHERE original_url = $1
              AND NOT is_deleted
            FOR UPDATE
            "#,
        )
        .bind(&request.long_url)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = existing {
            let correlation_id: String = row.try_get("correlation_id").map_err(map_sqlx_error)?;
            let key = parse_key(row.try_get("short_key").map_err(map_sqlx_error)?);

            attach(&mut tx, &OwnershipAssociation::new(user.clone(), correlation_id)).await?;
            tx.commit().await.map_err(map_sqlx_error)?;

            debug!(key = %key, url = %request.long_url, "long url already shortened");
            return Ok(Some(CreateOutcome::Duplicate(key)));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO short_urls (correlation_id, short_key, original_url, is_deleted)
            VALUES ($1, $2, $3, FALSE)
            "#,
        )
        .bind(&request.correlation_id)
        .bind(request.key.as_str())
        .bind(&request.long_url)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            return match violated_constraint(&err) {
                Some(PRIMARY_KEY) => Err(StorageError::CorrelationConflict(
                    request.correlation_id.clone(),
                )),
                Some(ACTIVE_KEY_INDEX) => Err(StorageError::KeyConflict(request.key.to_string())),
                Some(ACTIVE_URL_INDEX) => Ok(None),
                _ => Err(map_sqlx_error(err)),
            };
        }

        attach(
            &mut tx,
            &OwnershipAssociation::new(user.clone(), request.correlation_id.clone()),
        )
        .await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(Some(CreateOutcome::Created(request.key.clone())))
    }
}

/// Associates a user with a record. Attaching twice is a no-op.
async fn attach(
    tx: &mut Transaction<'_, Postgres>,
    association: &OwnershipAssociation,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO url_owners (association_id, user_id, correlation_id, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, correlation_id) DO NOTHING
        "#,
    )
    .bind(association.association_id.to_string())
    .bind(association.user_id.as_str())
    .bind(&association.correlation_id)
    .bind(association.created_at.as_second())
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

fn parse_key(raw: String) -> ShortKey {
    ShortKey::new_unchecked(raw)
}

fn parse_record(row: &PgRow) -> Result<ShortenedUrl> {
    Ok(ShortenedUrl {
        correlation_id: row.try_get("correlation_id").map_err(map_sqlx_error)?,
        key: parse_key(row.try_get("short_key").map_err(map_sqlx_error)?),
        long_url: row.try_get("original_url").map_err(map_sqlx_error)?,
        deleted: row.try_get("is_deleted").map_err(map_sqlx_error)?,
    })
}

fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    err.as_database_error()
        .filter(|db| db.is_unique_violation())
        .and_then(|db| db.constraint())
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl ReadRepository for PostgresRepository {
    async fn get(&self, key: &ShortKey) -> Result<Option<ShortenedUrl>> {
        let row = sqlx::query(
            r#"
            SELECT correlation_id, short_key, original_url, is_deleted
            FROM short_urls
            WHERE short_key = $1
            ORDER BY is_deleted ASC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(parse_record).transpose()
    }

    async fn list_for_user(&self, user: &UserId) -> Result<BTreeMap<ShortKey, String>> {
        let rows = sqlx::query(
            r#"
            SELECT s.short_key, s.original_url
            FROM url_owners o
            JOIN short_urls s ON s.correlation_id = o.correlation_id
            WHERE o.user_id = $1
              AND NOT s.is_deleted
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| -> Result<(ShortKey, String)> {
                let key = parse_key(row.try_get("short_key").map_err(map_sqlx_error)?);
                let url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
                Ok((key, url))
            })
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create(&self, request: NewShortenedUrl, user: &UserId) -> Result<CreateOutcome> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            if let Some(outcome) = self.try_create(&request, user).await? {
                return Ok(outcome);
            }
            debug!(url = %request.long_url, "lost a race for the long url, retrying");
        }

        Err(StorageError::Query(format!(
            "gave up creating {} after {MAX_CREATE_ATTEMPTS} attempts",
            request.key
        )))
    }

    async fn delete(&self, key: &ShortKey, user: &UserId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query(
            r#"
            SELECT correlation_id, is_deleted
            FROM short_urls
            WHERE short_key = $1
            ORDER BY is_deleted ASC, seq DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Err(StorageError::NotFound(key.to_string()));
        };
        let correlation_id: String = row.try_get("correlation_id").map_err(map_sqlx_error)?;
        let deleted: bool = row.try_get("is_deleted").map_err(map_sqlx_error)?;

        let owner: Option<String> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM url_owners
            WHERE correlation_id = $1
            ORDER BY seq ASC
            LIMIT 1
            "#,
        )
        .bind(&correlation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if owner.as_deref() != Some(user.as_str()) {
            return Err(StorageError::NotOwner {
                key: key.to_string(),
                user: user.to_string(),
            });
        }

        if !deleted {
            sqlx::query("UPDATE short_urls SET is_deleted = TRUE WHERE correlation_id = $1")
                .bind(&correlation_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }
}
