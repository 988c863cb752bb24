//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the harvester database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Frontier jobs, one logical queue per queue_name
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_name TEXT NOT NULL,
    key TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved_at TEXT,
    UNIQUE(queue_name, key)
);

CREATE INDEX IF NOT EXISTS idx_jobs_queue_state ON jobs(queue_name, state);

-- Harvested records, upserted on (body_uid, entity_type, original_id)
CREATE TABLE IF NOT EXISTS records (
    body_uid TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    original_id TEXT NOT NULL,
    original_url TEXT,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    PRIMARY KEY (body_uid, entity_type, original_id)
);

CREATE INDEX IF NOT EXISTS idx_records_type ON records(body_uid, entity_type);

-- Downloaded file bodies
CREATE TABLE IF NOT EXISTS file_contents (
    body_uid TEXT NOT NULL,
    original_id TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    size INTEGER NOT NULL,
    content BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (body_uid, original_id)
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
