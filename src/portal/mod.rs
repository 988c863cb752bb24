//! Portal variants: URL construction and page extraction
//!
//! Each council-information product lays out its pages differently. A
//! [`Portal`] knows how to address the pages of one product and how to turn
//! them into domain records plus references to further entities. The variant
//! is picked once at startup from the configured portal type; the coordinator
//! only ever talks to the trait.

mod allris;
mod markup;
mod sessionnet;

pub use allris::AllrisPortal;
pub use sessionnet::SessionNetPortal;

use crate::config::{BodyConfig, PortalKind};
use crate::crawler::{FetchedPage, PageRequest};
use crate::entity::{DomainRecord, EntityRef, EntityType, FileRecord};
use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;
use url::Url;

/// A page could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExtractError {
    /// Fetching and parsing the page again may succeed (truncated markup)
    pub retryable: bool,
    pub message: String,
}

impl ExtractError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// A file belonging to a record that has to be downloaded separately
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// File metadata known from the parent page
    pub file: FileRecord,
    pub request: PageRequest,
}

/// Part of a record that lives on a page of its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpTarget {
    /// Agenda item at this index of the meeting record
    AgendaItem(usize),
}

/// A page that completes a record after its own page was parsed
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub target: FollowUpTarget,
    pub request: PageRequest,
}

/// Everything extracted from one page
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub record: DomainRecord,
    /// References to entities that should be crawled as well
    pub discovered: Vec<EntityRef>,
    pub attachments: Vec<Attachment>,
    pub follow_ups: Vec<FollowUp>,
}

impl Extraction {
    pub fn new(record: DomainRecord) -> Self {
        Self {
            record,
            discovered: Vec::new(),
            attachments: Vec::new(),
            follow_ups: Vec::new(),
        }
    }
}

/// Overview pages used by the seed phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Persons,
    Meetings,
}

/// Extraction result of a single listing row
pub type RowResult = Result<Extraction, ExtractError>;

/// One council-information product
pub trait Portal: Send + Sync {
    fn kind(&self) -> PortalKind;

    /// Overview of all persons
    fn person_listing_request(&self) -> PageRequest;

    /// Meeting search pages covering `start..=end`
    fn meeting_search_requests(&self, start: NaiveDate, end: NaiveDate) -> Vec<PageRequest>;

    /// Detail page of an entity, if the product has one
    fn detail_request(&self, entity_type: EntityType, key: &str) -> Option<PageRequest>;

    /// Resolves the identifier from a detail page URL
    fn identifier_from_url(&self, entity_type: EntityType, url: &str) -> Option<String>;

    /// Parses a listing page row by row
    ///
    /// The outer error means the page as a whole is unusable; row errors are
    /// reported individually so one malformed row does not cost the others.
    fn extract_listing(
        &self,
        listing: Listing,
        page: &FetchedPage,
    ) -> Result<Vec<RowResult>, ExtractError>;

    /// Parses the detail page of one entity
    fn extract(
        &self,
        entity_type: EntityType,
        key: &str,
        page: &FetchedPage,
    ) -> Result<Extraction, ExtractError>;

    /// Merges a follow-up page into an extraction
    fn complete(
        &self,
        _extraction: &mut Extraction,
        _target: FollowUpTarget,
        _page: &FetchedPage,
    ) -> Result<(), ExtractError> {
        Ok(())
    }
}

/// Builds the portal variant configured for a body
pub fn build_portal(body: &BodyConfig) -> Box<dyn Portal> {
    match body.scraper.kind {
        PortalKind::Allris => Box::new(AllrisPortal::new(body)),
        PortalKind::SessionNet => Box::new(SessionNetPortal::new(body)),
    }
}

/// Fills `{name}` placeholders in a URL template
pub(crate) fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}

/// Reads a query parameter, ignoring the case of its name
pub(crate) fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = Url::parse(url)
        .or_else(|_| Url::parse("http://placeholder.invalid/").and_then(|base| base.join(url)))
        .ok()?;

    parsed
        .query_pairs()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Maps a party spelling found on the portal to its configured canonical name
pub(crate) fn canonical_party(aliases: &HashMap<String, String>, raw: &str) -> String {
    aliases
        .get(raw)
        .cloned()
        .unwrap_or_else(|| raw.to_string())
}

/// Parses a positive numeric portal id
pub(crate) fn parse_id(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().filter(|id| *id > 0)
}
