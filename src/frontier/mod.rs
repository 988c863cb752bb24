//! Persistent, deduplicating work queues
//!
//! There is one [`Frontier`] per queued entity type and body. Jobs are keyed
//! by entity identifier and stored through a [`JobStore`], so the frontier
//! is the source of truth for resuming an interrupted crawl:
//!
//! - `add` is idempotent: a key that already has a job (pending or done) is
//!   never queued twice in one crawl epoch.
//! - `get` does not claim the job. Only `resolve` moves it to done, so a
//!   crash between the two leaves the job pending for the next run.
//! - `garbage_collect` removes done jobs and must only run after a full
//!   drain.

mod job;

pub use job::{Job, JobState};

use crate::config::PortalKind;
use crate::entity::EntityType;
use crate::storage::{lock, JobStore, SharedStorage, StorageError, StorageResult};

/// Pending and done job counts of one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub done: u64,
}

/// A persisted job queue for one entity type
pub struct Frontier<S> {
    name: String,
    storage: SharedStorage<S>,
}

impl<S> Clone for Frontier<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            storage: self.storage.clone(),
        }
    }
}

/// Builds the persisted queue name, e.g. `koeln/ALLRIS_PAPER`
pub fn queue_name(body_uid: &str, portal: PortalKind, entity_type: EntityType) -> String {
    format!(
        "{}/{}_{}",
        body_uid,
        portal.queue_prefix(),
        entity_type.queue_suffix()
    )
}

impl<S: JobStore> Frontier<S> {
    pub fn new(name: impl Into<String>, storage: SharedStorage<S>) -> Self {
        Self {
            name: name.into(),
            storage,
        }
    }

    /// Frontier for one entity type of one body
    pub fn for_entity(
        body_uid: &str,
        portal: PortalKind,
        entity_type: EntityType,
        storage: SharedStorage<S>,
    ) -> Self {
        Self::new(queue_name(body_uid, portal, entity_type), storage)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `key` unless a job for it already exists
    ///
    /// Returns true if a new pending job was created.
    pub fn add(&self, key: &str) -> StorageResult<bool> {
        let created = lock(&self.storage)?.insert_job(&self.name, key)?;
        if created {
            tracing::debug!("Queued {} in {}", key, self.name);
        }
        Ok(created)
    }

    /// True iff at least one pending job exists
    pub fn has_next(&self) -> StorageResult<bool> {
        Ok(lock(&self.storage)?.oldest_pending(&self.name)?.is_some())
    }

    /// Returns the oldest pending job without changing its state
    pub fn get(&self) -> StorageResult<Option<Job>> {
        lock(&self.storage)?.oldest_pending(&self.name)
    }

    /// Marks a job as done
    ///
    /// Resolving an already resolved job is a no-op.
    pub fn resolve(&self, job: &Job) -> StorageResult<()> {
        if job.queue_name != self.name {
            return Err(StorageError::ForeignJob {
                job_id: job.id,
                queue: self.name.clone(),
            });
        }

        if !lock(&self.storage)?.mark_done(job.id)? {
            tracing::debug!("Job {} in {} was already done", job.key, self.name);
        }
        Ok(())
    }

    /// Permanently deletes done jobs; pending jobs are never touched
    pub fn garbage_collect(&self) -> StorageResult<u64> {
        let removed = lock(&self.storage)?.delete_done(&self.name)?;
        tracing::debug!("Removed {} done jobs from {}", removed, self.name);
        Ok(removed)
    }

    pub fn counts(&self) -> StorageResult<QueueCounts> {
        let storage = lock(&self.storage)?;
        Ok(QueueCounts {
            pending: storage.count_jobs(&self.name, JobState::Pending)?,
            done: storage.count_jobs(&self.name, JobState::Done)?,
        })
    }
}
