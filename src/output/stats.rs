//! Statistics generation from the harvest database
//!
//! This module provides functionality for reading queue and record counts of
//! one body from the storage layer and displaying them.

use crate::config::PortalKind;
use crate::entity::EntityType;
use crate::frontier::{queue_name, QueueCounts};
use crate::storage::{Storage, StorageResult};
use crate::JobState;

/// Harvest statistics of one body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestStatistics {
    pub body_uid: String,

    /// Pending and done jobs per frontier, in drain order
    pub queues: Vec<(String, QueueCounts)>,

    /// Stored records per entity type
    pub records: Vec<(EntityType, u64)>,
}

impl HarvestStatistics {
    pub fn pending_jobs(&self) -> u64 {
        self.queues.iter().map(|(_, counts)| counts.pending).sum()
    }

    pub fn total_records(&self) -> u64 {
        self.records.iter().map(|(_, count)| count).sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `body_uid` - Body whose queues and records are counted
/// * `portal` - Portal type, part of the queue names
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics<S: Storage>(
    storage: &S,
    body_uid: &str,
    portal: PortalKind,
) -> StorageResult<HarvestStatistics> {
    let mut queues = Vec::new();
    for entity_type in EntityType::QUEUED {
        let name = queue_name(body_uid, portal, entity_type);
        let counts = QueueCounts {
            pending: storage.count_jobs(&name, JobState::Pending)?,
            done: storage.count_jobs(&name, JobState::Done)?,
        };
        queues.push((name, counts));
    }

    let mut records = Vec::new();
    for entity_type in EntityType::ALL {
        records.push((entity_type, storage.count_records(body_uid, entity_type)?));
    }

    Ok(HarvestStatistics {
        body_uid: body_uid.to_string(),
        queues,
        records,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics: {} ===\n", stats.body_uid);

    println!("Queues:");
    for (name, counts) in &stats.queues {
        println!("  {}: {} pending, {} done", name, counts.pending, counts.done);
    }
    println!();

    println!("Records:");
    for (entity_type, count) in &stats.records {
        println!("  {}: {}", entity_type, count);
    }
    println!();

    if stats.pending_jobs() > 0 {
        println!(
            "{} jobs pending; run with --queue to resume",
            stats.pending_jobs()
        );
    } else {
        println!("All queues drained ({} records)", stats.total_records());
    }
}
