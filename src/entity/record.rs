//! Domain records handed to the store
//!
//! Every record has a stable `original_id`. Optional fields that were not
//! found on a page are left out of the serialized form, so saving a second,
//! partial record for the same entity fills in fields instead of erasing them.

use super::EntityType;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// Gender as reported by the portal's salutation field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Female,
    Male,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub original_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fax: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub memberships: Vec<Membership>,
}

impl Person {
    pub fn new(original_id: impl Into<String>) -> Self {
        Self {
            original_id: original_id.into(),
            ..Default::default()
        }
    }

    /// Display name used in log messages
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (None, Some(last)) => last.clone(),
            (Some(first), None) => first.clone(),
            (None, None) => self.original_id.clone(),
        }
    }
}

/// A person's seat in an organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub original_id: String,
    pub organization: Organization,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub original_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub original_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub agenda_items: Vec<AgendaItem>,
}

impl Meeting {
    pub fn new(original_id: impl Into<String>) -> Self {
        Self {
            original_id: original_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgendaItem {
    pub original_id: String,
    /// Dotted agenda number, e.g. `3.1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consultation: Option<Consultation>,
}

/// Link between an agenda item and the paper discussed under it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consultation {
    pub original_id: String,
    pub paper_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub original_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub related_papers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_file: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub auxiliary_files: Vec<String>,
}

impl Paper {
    pub fn new(original_id: impl Into<String>) -> Self {
        Self {
            original_id: original_id.into(),
            ..Default::default()
        }
    }
}

/// A downloaded document; the bytes are stored separately from the record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub original_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl FileRecord {
    /// Builds the download filename: name (or id) plus the configured extension
    ///
    /// Names are cut at 192 characters. Unknown MIME types get `dat`.
    pub fn make_filename(&self, extension: Option<&str>) -> String {
        let base: String = match &self.name {
            Some(name) if !name.trim().is_empty() => name.chars().take(192).collect(),
            _ => self.original_id.clone(),
        };
        format!("{}.{}", base, extension.unwrap_or("dat"))
    }
}

/// Any record the store can persist
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DomainRecord {
    Person(Person),
    Organization(Organization),
    Meeting(Meeting),
    Paper(Paper),
    File(FileRecord),
}

impl DomainRecord {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Person(_) => EntityType::Person,
            Self::Organization(_) => EntityType::Organization,
            Self::Meeting(_) => EntityType::Meeting,
            Self::Paper(_) => EntityType::Paper,
            Self::File(_) => EntityType::File,
        }
    }

    /// The stable identifier the store upserts on
    pub fn original_id(&self) -> &str {
        match self {
            Self::Person(r) => &r.original_id,
            Self::Organization(r) => &r.original_id,
            Self::Meeting(r) => &r.original_id,
            Self::Paper(r) => &r.original_id,
            Self::File(r) => &r.original_id,
        }
    }

    pub fn original_url(&self) -> Option<&str> {
        match self {
            Self::Person(r) => r.original_url.as_deref(),
            Self::Organization(r) => r.original_url.as_deref(),
            Self::Meeting(r) => r.original_url.as_deref(),
            Self::Paper(r) => r.original_url.as_deref(),
            Self::File(r) => r.original_url.as_deref(),
        }
    }
}
