//! Background bulk deletion.
//!
//! A batch is fed by one producer task into a bounded queue and drained by a
//! fixed pool of worker tasks, all bounded by a single deadline. Submitting a
//! batch never waits for it: the caller gets a [`DeletionHandle`] it may drop
//! or await.

use pinhole_core::{Repository, ShortKey, UserId};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};
use typed_builder::TypedBuilder;

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
pub struct BatchDeletionConfig {
    /// Number of concurrent delete attempts per batch.
    #[builder(default = DEFAULT_WORKERS)]
    pub workers: usize,
    /// Budget for the whole batch, measured from submission.
    #[builder(default = DEFAULT_DEADLINE)]
    pub deadline: Duration,
    #[builder(default = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

impl Default for BatchDeletionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeletionReport {
    pub requested: usize,
    /// Deletes that succeeded. Repeating a delete on a key the caller
    /// already removed succeeds too, so this can exceed the number of
    /// records the batch actually tombstoned.
    pub deleted: u64,
    pub failed: u64,
    /// The deadline fired before every key was attempted.
    pub deadline_exceeded: bool,
}

impl DeletionReport {
    /// Keys that were never attempted.
    pub fn skipped(&self) -> u64 {
        (self.requested as u64).saturating_sub(self.deleted + self.failed)
    }
}

/// Handle to a running batch.
///
/// Dropping it detaches the batch, which keeps running to completion or
/// deadline. Awaiting it yields the [`DeletionReport`].
#[derive(Debug)]
pub struct DeletionHandle {
    inner: JoinHandle<DeletionReport>,
}

impl DeletionHandle {
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl Future for DeletionHandle {
    type Output = Result<DeletionReport, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

/// Runs bulk deletions against a repository.
pub struct BatchDeleter<R> {
    repository: Arc<R>,
    config: BatchDeletionConfig,
    failures: Arc<AtomicU64>,
}

impl<R> Clone for BatchDeleter<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            config: self.config,
            failures: Arc::clone(&self.failures),
        }
    }
}

impl<R> std::fmt::Debug for BatchDeleter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDeleter")
            .field("config", &self.config)
            .field("failures", &self.total_failures())
            .finish_non_exhaustive()
    }
}

impl<R> BatchDeleter<R> {
    pub fn config(&self) -> &BatchDeletionConfig {
        &self.config
    }

    /// Failed deletes across every batch this deleter has run.
    pub fn total_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl<R: Repository> BatchDeleter<R> {
    pub fn new(repository: Arc<R>, config: BatchDeletionConfig) -> Self {
        Self {
            repository,
            config,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts deleting `keys` on behalf of `user` and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, keys: Vec<ShortKey>, user: UserId) -> DeletionHandle {
        let requested = keys.len();
        let deadline = Instant::now() + self.config.deadline;
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));

        let batch = Arc::new(Batch {
            repository: Arc::clone(&self.repository),
            user,
            deadline,
            queue: Mutex::new(receiver),
            deleted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            lifetime_failures: Arc::clone(&self.failures),
        });

        debug!(
            user = %batch.user,
            requested,
            workers = self.config.workers,
            "batch deletion submitted"
        );

        let producer = tokio::spawn(produce(keys, sender, deadline));

        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers.max(1) {
            workers.spawn(run_worker(Arc::clone(&batch), worker));
        }

        let inner = tokio::spawn(async move {
            let mut deadline_exceeded = false;

            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(stopped_by_deadline) => deadline_exceeded |= stopped_by_deadline,
                    Err(err) => warn!(error = %err, "deletion worker aborted"),
                }
            }

            match producer.await {
                Ok(stopped_by_deadline) => deadline_exceeded |= stopped_by_deadline,
                Err(err) => warn!(error = %err, "deletion producer aborted"),
            }

            let report = DeletionReport {
                requested,
                deleted: batch.deleted.load(Ordering::Relaxed),
                failed: batch.failed.load(Ordering::Relaxed),
                deadline_exceeded,
            };

            info!(
                user = %batch.user,
                requested = report.requested,
                deleted = report.deleted,
                failed = report.failed,
                deadline_exceeded = report.deadline_exceeded,
                "deletion is finished"
            );

            report
        });

        DeletionHandle { inner }
    }
}

struct Batch<R> {
    repository: Arc<R>,
    user: UserId,
    deadline: Instant,
    queue: Mutex<mpsc::Receiver<ShortKey>>,
    deleted: AtomicU64,
    failed: AtomicU64,
    lifetime_failures: Arc<AtomicU64>,
}

impl<R> Batch<R> {
    async fn next_key(&self) -> Option<ShortKey> {
        self.queue.lock().await.recv().await
    }
}

/// Feeds keys into the queue. Returns `true` if the deadline cut it short.
async fn produce(keys: Vec<ShortKey>, sender: mpsc::Sender<ShortKey>, deadline: Instant) -> bool {
    for key in keys {
        tokio::select! {
            biased;
            _ = sleep_until(deadline) => return true,
            sent = sender.send(key) => {
                if sent.is_err() {
                    // every worker is gone
                    return false;
                }
            }
        }
    }
    false
}

/// Pulls keys until the queue closes or the deadline fires. Returns `true`
/// in the latter case. A delete already in flight is never interrupted.
async fn run_worker<R: Repository>(batch: Arc<Batch<R>>, worker: usize) -> bool {
    loop {
        let next = tokio::select! {
            biased;
            _ = sleep_until(batch.deadline) => return true,
            key = batch.next_key() => key,
        };

        let Some(key) = next else {
            return false;
        };

        match batch.repository.delete(&key, &batch.user).await {
            Ok(()) => {
                batch.deleted.fetch_add(1, Ordering::Relaxed);
                trace!(worker, key = %key, "deleted");
            }
            Err(err) => {
                batch.failed.fetch_add(1, Ordering::Relaxed);
                batch.lifetime_failures.fetch_add(1, Ordering::Relaxed);
                debug!(worker, key = %key, error = %err, "delete failed");
            }
        }
    }
}
