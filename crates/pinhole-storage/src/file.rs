//! File-backed storage engine.
//!
//! All records and associations live in memory behind one engine-wide lock
//! and are mirrored to two [`Journal`]s: one for records, one for ownership
//! associations. Creates append to the journals; deletes rewrite the whole
//! records journal with the tombstone applied. Opening the engine replays
//! both journals to rebuild the in-memory indices.
//!
//! Known gap: a create appends the record and then the association as two
//! separate writes. A crash in between leaves an orphan record with no owner,
//! which nobody can delete.

use crate::journal::Journal;
use async_trait::async_trait;
use parking_lot::Mutex;
use pinhole_core::error::{Result, StorageError};
use pinhole_core::repository::{
    CreateOutcome, NewShortenedUrl, OwnershipAssociation, ReadRepository, Repository,
    ShortenedUrl,
};
use pinhole_core::{ShortKey, UserId};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Locations of the two journals backing a [`FileRepository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub records: PathBuf,
    pub associations: PathBuf,
}

impl StoragePaths {
    pub fn new(records: impl Into<PathBuf>, associations: impl Into<PathBuf>) -> Self {
        Self {
            records: records.into(),
            associations: associations.into(),
        }
    }

    /// Derives the associations journal from the records journal by appending
    /// `2` to the file stem: `urls.json` pairs with `urls2.json`, `urls` with
    /// `urls2`.
    pub fn from_records_path(records: impl Into<PathBuf>) -> Self {
        let records = records.into();
        let associations = associations_path_for(&records);
        Self {
            records,
            associations,
        }
    }
}

fn associations_path_for(records: &Path) -> PathBuf {
    let stem = records
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name = match records.extension() {
        Some(extension) => format!("{stem}2.{}", extension.to_string_lossy()),
        None => format!("{stem}2"),
    };

    records.with_file_name(name)
}

/// Counters describing the replayed and current engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub records: usize,
    pub active: usize,
    pub associations: usize,
}

/// Storage engine persisting to two line-delimited JSON journals.
///
/// Every operation, reads included, serializes on a single lock held for
/// the index lookups, the in-memory mutation and the journal write. A delete
/// rewrites the full records journal, so its cost grows with the total number
/// of records ever created.
///
/// The repository methods run that work on tokio's blocking pool, keeping
/// lock waits and fsyncs off the async workers.
#[derive(Debug)]
pub struct FileRepository {
    state: Arc<Mutex<EngineState>>,
}

#[derive(Debug)]
struct EngineState {
    records: Vec<ShortenedUrl>,
    by_correlation: HashMap<String, usize>,
    active_by_key: HashMap<ShortKey, usize>,
    active_by_url: HashMap<String, usize>,
    /// Latest tombstoned record per key, for `Gone` lookups and idempotent deletes.
    tombstones_by_key: HashMap<ShortKey, usize>,
    /// Users associated with each correlation id, in association order.
    owners: HashMap<String, Vec<UserId>>,
    /// Correlation ids each user is associated with.
    by_user: HashMap<UserId, Vec<String>>,
    association_count: usize,
    records_log: Journal<ShortenedUrl>,
    associations_log: Journal<OwnershipAssociation>,
}

impl FileRepository {
    /// Opens the engine, replaying both journals.
    ///
    /// Missing or unreadable journals are replaced by empty ones rather than
    /// failing; see [`Journal::open`].
    pub fn open(paths: StoragePaths) -> Result<Self> {
        let (records_log, records) = Journal::open(&paths.records)?;
        let (associations_log, associations) = Journal::open(&paths.associations)?;

        let mut state = EngineState {
            records: Vec::with_capacity(records.len()),
            by_correlation: HashMap::new(),
            active_by_key: HashMap::new(),
            active_by_url: HashMap::new(),
            tombstones_by_key: HashMap::new(),
            owners: HashMap::new(),
            by_user: HashMap::new(),
            association_count: 0,
            records_log,
            associations_log,
        };

        state.replay_records(records);
        state.replay_associations(associations);

        let repository = Self {
            state: Arc::new(Mutex::new(state)),
        };

        let stats = repository.stats();
        info!(
            records_path = %paths.records.display(),
            associations_path = %paths.associations.display(),
            records = stats.records,
            active = stats.active,
            associations = stats.associations,
            "file repository opened"
        );

        Ok(repository)
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        EngineState::stats(&state)
    }

    /// Runs `operation` against the locked engine state on the blocking pool.
    async fn with_state<F, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&mut EngineState) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || operation(&mut state.lock()))
            .await
            .map_err(|err| StorageError::Persistence(format!("storage task failed: {err}")))?
    }
}

impl EngineState {
    fn stats(&self) -> EngineStats {
        EngineStats {
            records: self.records.len(),
            active: self.active_by_key.len(),
            associations: self.association_count,
        }
    }

    fn lookup(&self, key: &ShortKey) -> Option<ShortenedUrl> {
        self.active_by_key
            .get(key)
            .or_else(|| self.tombstones_by_key.get(key))
            .map(|&index| self.records[index].clone())
    }

    fn urls_for(&self, user: &UserId) -> BTreeMap<ShortKey, String> {
        let Some(correlation_ids) = self.by_user.get(user) else {
            return BTreeMap::new();
        };

        correlation_ids
            .iter()
            .filter_map(|correlation_id| self.by_correlation.get(correlation_id))
            .map(|&index| &self.records[index])
            .filter(|record| record.is_active())
            .map(|record| (record.key.clone(), record.long_url.clone()))
            .collect()
    }

    fn check_journals(&self) -> Result<()> {
        for path in [self.records_log.path(), self.associations_log.path()] {
            if !path.is_file() {
                return Err(StorageError::Unavailable(format!(
                    "journal missing: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    fn insert(&mut self, request: NewShortenedUrl, user: &UserId) -> Result<CreateOutcome> {
        if self.by_correlation.contains_key(&request.correlation_id) {
            debug!(correlation_id = %request.correlation_id, "correlation id already used");
            return Err(StorageError::CorrelationConflict(request.correlation_id));
        }

        if let Some(&index) = self.active_by_url.get(&request.long_url) {
            let existing = self.records[index].clone();
            debug!(
                key = %existing.key,
                url = %existing.long_url,
                "long url already shortened"
            );

            if !self.is_associated(&existing.correlation_id, user) {
                let association =
                    OwnershipAssociation::new(user.clone(), existing.correlation_id.clone());
                self.associations_log.append(&association)?;
                self.push_association(association);
            }

            return Ok(CreateOutcome::Duplicate(existing.key));
        }

        if self.active_by_key.contains_key(&request.key) {
            debug!(key = %request.key, "short key held by an active record");
            return Err(StorageError::KeyConflict(request.key.to_string()));
        }

        let record = ShortenedUrl {
            correlation_id: request.correlation_id,
            key: request.key,
            long_url: request.long_url,
            deleted: false,
        };
        self.records_log.append(&record)?;

        let association = OwnershipAssociation::new(user.clone(), record.correlation_id.clone());
        if let Err(err) = self.associations_log.append(&association) {
            // take the record line back out so replay does not resurrect an ownerless record
            if let Err(rollback) = self.records_log.rewrite(&self.records) {
                warn!(
                    key = %record.key,
                    error = %rollback,
                    "failed to roll back record after association write failure"
                );
            }
            return Err(err);
        }

        let key = record.key.clone();
        self.push_record(record);
        self.push_association(association);

        trace!(key = %key, user = %user, "record created");
        Ok(CreateOutcome::Created(key))
    }

    fn tombstone(&mut self, key: &ShortKey, user: &UserId) -> Result<()> {
        let Some(&index) = self.active_by_key.get(key) else {
            return match self.tombstones_by_key.get(key) {
                // deleting a tombstone is a no-op for its owner
                Some(&index) => self.ensure_owner(index, user),
                None => Err(StorageError::NotFound(key.to_string())),
            };
        };

        self.ensure_owner(index, user)?;

        let mut tombstoned = self.records[index].clone();
        tombstoned.deleted = true;

        self.records_log
            .rewrite(self.records.iter().enumerate().map(|(position, record)| {
                if position == index {
                    &tombstoned
                } else {
                    record
                }
            }))?;

        self.records[index] = tombstoned;
        self.active_by_key.remove(key);
        let url = self.records[index].long_url.clone();
        self.active_by_url.remove(&url);
        self.tombstones_by_key.insert(key.clone(), index);

        trace!(key = %key, user = %user, "record tombstoned");
        Ok(())
    }

    /// Applies replayed records in file order. A line whose correlation id was
    /// already seen overrides the tombstone flag of the earlier one.
    fn replay_records(&mut self, records: Vec<ShortenedUrl>) {
        for record in records {
            match self.by_correlation.get(&record.correlation_id) {
                Some(&index) => self.records[index].deleted = record.deleted,
                None => {
                    self.by_correlation
                        .insert(record.correlation_id.clone(), self.records.len());
                    self.records.push(record);
                }
            }
        }

        for (index, record) in self.records.iter().enumerate() {
            if record.deleted {
                self.tombstones_by_key.insert(record.key.clone(), index);
                continue;
            }

            if let Some(previous) = self.active_by_key.insert(record.key.clone(), index) {
                warn!(
                    key = %record.key,
                    previous_correlation_id = %self.records[previous].correlation_id,
                    correlation_id = %record.correlation_id,
                    "replayed two active records with the same key, keeping the later one"
                );
            }
            self.active_by_url.insert(record.long_url.clone(), index);
        }
    }

    fn replay_associations(&mut self, associations: Vec<OwnershipAssociation>) {
        for association in associations {
            if self.is_associated(&association.correlation_id, &association.user_id) {
                continue;
            }
            if !self.by_correlation.contains_key(&association.correlation_id) {
                debug!(
                    correlation_id = %association.correlation_id,
                    "replayed association for an unknown record"
                );
            }
            self.push_association(association);
        }
    }

    fn push_record(&mut self, record: ShortenedUrl) {
        let index = self.records.len();
        self.by_correlation
            .insert(record.correlation_id.clone(), index);
        self.active_by_key.insert(record.key.clone(), index);
        self.active_by_url.insert(record.long_url.clone(), index);
        self.records.push(record);
    }

    fn push_association(&mut self, association: OwnershipAssociation) {
        self.owners
            .entry(association.correlation_id.clone())
            .or_default()
            .push(association.user_id.clone());
        self.by_user
            .entry(association.user_id)
            .or_default()
            .push(association.correlation_id);
        self.association_count += 1;
    }

    fn is_associated(&self, correlation_id: &str, user: &UserId) -> bool {
        self.owners
            .get(correlation_id)
            .is_some_and(|users| users.contains(user))
    }

    /// The first user associated with a record is its owner.
    fn ensure_owner(&self, index: usize, user: &UserId) -> Result<()> {
        let record = &self.records[index];
        let owner = self
            .owners
            .get(&record.correlation_id)
            .and_then(|users| users.first());

        if owner == Some(user) {
            Ok(())
        } else {
            debug!(key = %record.key, user = %user, "delete rejected, not the owner");
            Err(StorageError::NotOwner {
                key: record.key.to_string(),
                user: user.to_string(),
            })
        }
    }
}

#[async_trait]
impl ReadRepository for FileRepository {
    async fn get(&self, key: &ShortKey) -> Result<Option<ShortenedUrl>> {
        let key = key.clone();
        self.with_state(move |state| Ok(state.lookup(&key))).await
    }

    async fn list_for_user(&self, user: &UserId) -> Result<BTreeMap<ShortKey, String>> {
        let user = user.clone();
        self.with_state(move |state| Ok(state.urls_for(&user))).await
    }

    async fn ping(&self) -> Result<()> {
        self.with_state(|state| state.check_journals()).await
    }
}

#[async_trait]
impl Repository for FileRepository {
    async fn create(&self, request: NewShortenedUrl, user: &UserId) -> Result<CreateOutcome> {
        let user = user.clone();
        self.with_state(move |state| state.insert(request, &user)).await
    }

    async fn delete(&self, key: &ShortKey, user: &UserId) -> Result<()> {
        let (key, user) = (key.clone(), user.clone());
        self.with_state(move |state| state.tombstone(&key, &user)).await
    }
}
