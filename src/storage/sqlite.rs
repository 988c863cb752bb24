//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the [`JobStore`]
//! and [`RecordStore`] traits.

use crate::entity::{DomainRecord, EntityType};
use crate::frontier::{Job, JobState};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{JobStore, RecordStore, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

/// Raw job columns as read from the database
type JobRow = (i64, String, String, String, String, Option<String>);

const JOB_COLUMNS: &str = "id, queue_name, key, state, created_at, resolved_at";

impl SqliteStorage {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn row_to_job(row: JobRow) -> StorageResult<Job> {
        let (id, queue_name, key, state, created_at, resolved_at) = row;

        let state = JobState::from_db_string(&state)
            .ok_or_else(|| StorageError::Corrupt(format!("job {} has state '{}'", id, state)))?;
        let created_at = parse_timestamp(id, &created_at)?;
        let resolved_at = resolved_at
            .map(|value| parse_timestamp(id, &value))
            .transpose()?;

        Ok(Job {
            id,
            queue_name,
            key,
            state,
            created_at,
            resolved_at,
        })
    }
}

fn parse_timestamp(job_id: i64, value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            StorageError::Corrupt(format!("job {} has timestamp '{}': {}", job_id, value, e))
        })
}

fn read_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

impl JobStore for SqliteStorage {
    fn insert_job(&mut self, queue_name: &str, key: &str) -> StorageResult<bool> {
        let now = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO jobs (queue_name, key, state, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![queue_name, key, JobState::Pending.to_db_string(), now],
        )?;
        Ok(inserted == 1)
    }

    fn oldest_pending(&self, queue_name: &str) -> StorageResult<Option<Job>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM jobs WHERE queue_name = ?1 AND state = ?2 ORDER BY id ASC LIMIT 1",
                    JOB_COLUMNS
                ),
                params![queue_name, JobState::Pending.to_db_string()],
                read_job_row,
            )
            .optional()?;

        row.map(Self::row_to_job).transpose()
    }

    fn get_job(&self, job_id: i64) -> StorageResult<Job> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                read_job_row,
            )
            .optional()?
            .ok_or(StorageError::JobNotFound(job_id))?;

        Self::row_to_job(row)
    }

    fn mark_done(&mut self, job_id: i64) -> StorageResult<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE jobs SET state = ?1, resolved_at = ?2 WHERE id = ?3 AND state = ?4",
            params![
                JobState::Done.to_db_string(),
                now,
                job_id,
                JobState::Pending.to_db_string()
            ],
        )?;

        if changed == 0 {
            // Distinguish "already done" from "never existed"
            self.get_job(job_id)?;
            return Ok(false);
        }

        Ok(true)
    }

    fn delete_done(&mut self, queue_name: &str) -> StorageResult<u64> {
        let deleted = self.conn.execute(
            "DELETE FROM jobs WHERE queue_name = ?1 AND state = ?2",
            params![queue_name, JobState::Done.to_db_string()],
        )?;
        Ok(deleted as u64)
    }

    fn count_jobs(&self, queue_name: &str, state: JobState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE queue_name = ?1 AND state = ?2",
            params![queue_name, state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn delete_queues(&mut self, prefix: &str) -> StorageResult<u64> {
        let deleted = self.conn.execute(
            "DELETE FROM jobs WHERE substr(queue_name, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        Ok(deleted as u64)
    }
}

impl RecordStore for SqliteStorage {
    fn save_record(&mut self, body_uid: &str, record: &DomainRecord) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(record)?;
        let entity_type = record.entity_type().to_db_string();

        // json_patch merges the new payload into the stored one; keys absent
        // from the new payload survive.
        self.conn.execute(
            "INSERT INTO records (body_uid, entity_type, original_id, original_url, payload, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(body_uid, entity_type, original_id) DO UPDATE SET
                original_url = COALESCE(excluded.original_url, records.original_url),
                payload = json_patch(records.payload, excluded.payload),
                modified_at = excluded.modified_at",
            params![
                body_uid,
                entity_type,
                record.original_id(),
                record.original_url(),
                payload,
                now
            ],
        )?;

        let rowid: i64 = self.conn.query_row(
            "SELECT rowid FROM records WHERE body_uid = ?1 AND entity_type = ?2 AND original_id = ?3",
            params![body_uid, entity_type, record.original_id()],
            |row| row.get(0),
        )?;

        Ok(rowid)
    }

    fn save_file_content(
        &mut self,
        body_uid: &str,
        file_id: &str,
        sha256: &str,
        content: &[u8],
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO file_contents (body_uid, original_id, sha256, size, content, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![body_uid, file_id, sha256, content.len() as i64, content, now],
        )?;
        Ok(())
    }

    fn load_record(
        &self,
        body_uid: &str,
        entity_type: EntityType,
        original_id: &str,
    ) -> StorageResult<Option<serde_json::Value>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM records WHERE body_uid = ?1 AND entity_type = ?2 AND original_id = ?3",
                params![body_uid, entity_type.to_db_string(), original_id],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(StorageError::from))
            .transpose()
    }

    fn count_records(&self, body_uid: &str, entity_type: EntityType) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE body_uid = ?1 AND entity_type = ?2",
            params![body_uid, entity_type.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn erase_body(&mut self, body_uid: &str) -> StorageResult<u64> {
        let tx = self.conn.transaction()?;
        let records = tx.execute("DELETE FROM records WHERE body_uid = ?1", params![body_uid])?;
        tx.execute(
            "DELETE FROM file_contents WHERE body_uid = ?1",
            params![body_uid],
        )?;
        tx.commit()?;
        Ok(records as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Paper, Person};

    const QUEUE: &str = "koeln/ALLRIS_PAPER";

    #[test]
    fn test_insert_job_is_idempotent() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.insert_job(QUEUE, "42").unwrap());
        assert!(!storage.insert_job(QUEUE, "42").unwrap());
        assert_eq!(storage.count_jobs(QUEUE, JobState::Pending).unwrap(), 1);
    }

    #[test]
    fn test_same_key_in_different_queues() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.insert_job(QUEUE, "42").unwrap());
        assert!(storage.insert_job("koeln/ALLRIS_MEETING", "42").unwrap());
    }

    #[test]
    fn test_oldest_pending_is_fifo() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.insert_job(QUEUE, "b").unwrap();
        storage.insert_job(QUEUE, "a").unwrap();

        let first = storage.oldest_pending(QUEUE).unwrap().unwrap();
        assert_eq!(first.key, "b");
        // Reading does not claim the job
        let again = storage.oldest_pending(QUEUE).unwrap().unwrap();
        assert_eq!(again.id, first.id);
    }

    #[test]
    fn test_mark_done() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.insert_job(QUEUE, "42").unwrap();
        let job = storage.oldest_pending(QUEUE).unwrap().unwrap();

        assert!(storage.mark_done(job.id).unwrap());
        assert!(!storage.mark_done(job.id).unwrap());

        let done = storage.get_job(job.id).unwrap();
        assert_eq!(done.state, JobState::Done);
        assert!(done.resolved_at.is_some());
        assert!(storage.oldest_pending(QUEUE).unwrap().is_none());
    }

    #[test]
    fn test_mark_done_unknown_job() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(matches!(
            storage.mark_done(999),
            Err(StorageError::JobNotFound(999))
        ));
    }

    #[test]
    fn test_delete_done_keeps_pending() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.insert_job(QUEUE, "1").unwrap();
        storage.insert_job(QUEUE, "2").unwrap();
        let job = storage.oldest_pending(QUEUE).unwrap().unwrap();
        storage.mark_done(job.id).unwrap();

        assert_eq!(storage.delete_done(QUEUE).unwrap(), 1);
        assert_eq!(storage.count_jobs(QUEUE, JobState::Pending).unwrap(), 1);
        assert_eq!(storage.count_jobs(QUEUE, JobState::Done).unwrap(), 0);
    }

    #[test]
    fn test_delete_queues_by_prefix() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.insert_job("koeln/ALLRIS_PAPER", "1").unwrap();
        storage.insert_job("koeln/ALLRIS_PERSON", "1").unwrap();
        storage.insert_job("koeln_x/ALLRIS_PAPER", "1").unwrap();

        assert_eq!(storage.delete_queues("koeln/").unwrap(), 2);
        assert_eq!(
            storage.count_jobs("koeln_x/ALLRIS_PAPER", JobState::Pending).unwrap(),
            1
        );
    }

    #[test]
    fn test_save_record_merges_fields() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();

        let mut listed = Person::new("17");
        listed.last_name = Some("Mustermann".to_string());
        listed.email = Some("erika@example.org".to_string());
        let id1 = storage
            .save_record("koeln", &DomainRecord::Person(listed))
            .unwrap();

        let mut detailed = Person::new("17");
        detailed.last_name = Some("Musterfrau".to_string());
        let id2 = storage
            .save_record("koeln", &DomainRecord::Person(detailed))
            .unwrap();

        assert_eq!(id1, id2);
        let stored = storage
            .load_record("koeln", EntityType::Person, "17")
            .unwrap()
            .unwrap();
        assert_eq!(stored["last_name"], "Musterfrau");
        assert_eq!(stored["email"], "erika@example.org");
        assert_eq!(storage.count_records("koeln", EntityType::Person).unwrap(), 1);
    }

    #[test]
    fn test_records_are_scoped_by_body() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let paper = DomainRecord::Paper(Paper::new("42"));
        storage.save_record("koeln", &paper).unwrap();
        storage.save_record("bonn", &paper).unwrap();

        assert_eq!(storage.count_records("koeln", EntityType::Paper).unwrap(), 1);
        assert_eq!(storage.erase_body("koeln").unwrap(), 1);
        assert_eq!(storage.count_records("koeln", EntityType::Paper).unwrap(), 0);
        assert_eq!(storage.count_records("bonn", EntityType::Paper).unwrap(), 1);
    }

    #[test]
    fn test_save_file_content_replaces() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .save_file_content("koeln", "881", "aa", b"first")
            .unwrap();
        storage
            .save_file_content("koeln", "881", "bb", b"second")
            .unwrap();

        let (sha, size): (String, i64) = storage
            .conn
            .query_row(
                "SELECT sha256, size FROM file_contents WHERE original_id = '881'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(sha, "bb");
        assert_eq!(size, 6);
    }
}
