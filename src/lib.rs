//! ris-harvester: an incremental harvester for council-information portals
//!
//! This crate crawls municipal council-information systems (AllRis and
//! SessionNet installations), following the graph of people, meetings and
//! papers through persistent per-entity job queues so that an interrupted
//! crawl can always be resumed.

pub mod config;
pub mod crawler;
pub mod entity;
pub mod frontier;
pub mod output;
pub mod portal;
pub mod storage;

use thiserror::Error;

/// Main error type for harvester operations
///
/// Only catastrophic conditions end up here. Per-entity problems (unreachable
/// pages, private content, malformed markup) are logged and skipped by the
/// coordinator instead.
#[derive(Debug, Error)]
pub enum RisError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Cannot resolve {entity} identifier from {url}")]
    UnresolvableUrl { entity: entity::EntityType, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Unknown body: {0}")]
    UnknownBody(String),
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, RisError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use entity::{DomainRecord, EntityRef, EntityType};
pub use frontier::{Frontier, Job, JobState};
