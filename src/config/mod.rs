//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! One file can describe several bodies; a run always works on exactly one of
//! them, selected by its uid.
//!
//! # Example
//!
//! ```no_run
//! use ris_harvester::config::load_body_config;
//! use std::path::Path;
//!
//! let config = load_body_config(Path::new("ris.toml"), "koeln").unwrap();
//! println!("Harvesting {}", config.scraper().base_url);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BodyConfig, Config, ConfigFile, FileExtension, OutputConfig, PortalKind, RetryConfig,
    ScraperConfig, UrlTemplates,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_body_config, load_config_file};
