//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types. Job persistence and record persistence are
//! separate traits so the frontier never sees records and vice versa.

use crate::entity::{DomainRecord, EntityType};
use crate::frontier::{Job, JobState};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Job {job_id} does not belong to queue {queue}")]
    ForeignJob { job_id: i64, queue: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence for frontier jobs
///
/// Queue names partition the jobs; implementations must keep at most one
/// job per `(queue_name, key)`.
pub trait JobStore {
    /// Inserts a pending job unless one with that key already exists
    ///
    /// Returns true if a new job was created.
    fn insert_job(&mut self, queue_name: &str, key: &str) -> StorageResult<bool>;

    /// Returns the oldest pending job of a queue without changing it
    fn oldest_pending(&self, queue_name: &str) -> StorageResult<Option<Job>>;

    /// Gets a job by its row id
    fn get_job(&self, job_id: i64) -> StorageResult<Job>;

    /// Marks a pending job as done and records the resolution time
    ///
    /// Returns false if the job was already done.
    fn mark_done(&mut self, job_id: i64) -> StorageResult<bool>;

    /// Deletes all done jobs of a queue and returns how many were removed
    fn delete_done(&mut self, queue_name: &str) -> StorageResult<u64>;

    /// Counts the jobs of a queue in a given state
    fn count_jobs(&self, queue_name: &str, state: JobState) -> StorageResult<u64>;

    /// Deletes every job whose queue name starts with `prefix`
    fn delete_queues(&mut self, prefix: &str) -> StorageResult<u64>;
}

/// Persistence for harvested records
pub trait RecordStore {
    /// Upserts a record by `(body, entity type, original id)`
    ///
    /// Fields of an existing record that the new record does not carry are
    /// kept. Returns the persisted row id.
    fn save_record(&mut self, body_uid: &str, record: &DomainRecord) -> StorageResult<i64>;

    /// Stores the bytes of a downloaded file, replacing earlier content
    fn save_file_content(
        &mut self,
        body_uid: &str,
        file_id: &str,
        sha256: &str,
        content: &[u8],
    ) -> StorageResult<()>;

    /// Loads the stored JSON payload of a record
    fn load_record(
        &self,
        body_uid: &str,
        entity_type: EntityType,
        original_id: &str,
    ) -> StorageResult<Option<serde_json::Value>>;

    /// Counts the records of one entity type
    fn count_records(&self, body_uid: &str, entity_type: EntityType) -> StorageResult<u64>;

    /// Deletes all records and file contents of a body
    fn erase_body(&mut self, body_uid: &str) -> StorageResult<u64>;
}

/// A backend that can hold both jobs and records
pub trait Storage: JobStore + RecordStore {}

impl<T: JobStore + RecordStore> Storage for T {}
