//! Crawler module for page fetching and crawl coordination
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with retry logic and redirect classification
//! - The seed, drain and garbage collection phases of a harvest

mod coordinator;
mod fetcher;

pub use coordinator::{Coordinator, RunPlan, RunSummary};
pub use fetcher::{
    build_http_client, BodyKind, Content, FetchOutcome, FetchedPage, Fetcher, PageRequest,
};
