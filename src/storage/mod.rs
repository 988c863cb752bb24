//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Frontier job persistence (the source of truth for resuming a crawl)
//! - Record upserts and downloaded file contents

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{JobStore, RecordStore, Storage, StorageError, StorageResult};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage handle shared between the frontiers and the coordinator
pub type SharedStorage<S> = Arc<Mutex<S>>;

/// Opens the database and wraps it for sharing
pub fn open_shared(path: &Path) -> StorageResult<SharedStorage<SqliteStorage>> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// Locks a shared storage handle
///
/// A poisoned lock means a previous holder panicked mid-write; that is
/// reported as a storage failure rather than propagated as a panic.
pub fn lock<S>(storage: &SharedStorage<S>) -> StorageResult<MutexGuard<'_, S>> {
    storage.lock().map_err(|_| StorageError::LockPoisoned)
}
