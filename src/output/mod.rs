//! Output module for harvest reports
//!
//! This module handles:
//! - Reading queue and record statistics of a body
//! - Printing them for the `--status` mode

pub mod stats;

pub use stats::{load_statistics, print_statistics, HarvestStatistics};
