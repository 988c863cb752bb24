//! Entity references and the records produced for them
//!
//! An [`EntityRef`] names something on the portal that may or may not have
//! been fetched yet. Two refs with the same entity type and identifier always
//! denote the same logical entity, which is what makes frontier enqueueing and
//! record upserts idempotent.

mod record;

pub use record::{
    AgendaItem, Consultation, DomainRecord, FileRecord, Meeting, Membership, Organization, Paper,
    Person, Sex,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of entities harvested from a portal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Organization,
    Meeting,
    Paper,
    File,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        Self::Person,
        Self::Organization,
        Self::Meeting,
        Self::Paper,
        Self::File,
    ];

    /// Entity types that have their own frontier, in drain order
    pub const QUEUED: [EntityType; 3] = [Self::Person, Self::Meeting, Self::Paper];

    /// Converts the entity type to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Meeting => "meeting",
            Self::Paper => "paper",
            Self::File => "file",
        }
    }

    /// Parses an entity type from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "person" => Some(Self::Person),
            "organization" => Some(Self::Organization),
            "meeting" => Some(Self::Meeting),
            "paper" => Some(Self::Paper),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    /// Suffix used in persisted queue names (`ALLRIS_PAPER`)
    pub fn queue_suffix(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Organization => "ORGANIZATION",
            Self::Meeting => "MEETING",
            Self::Paper => "PAPER",
            Self::File => "FILE",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Where an entity reference came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntitySource {
    /// Numeric id as used in the portal's query strings
    NumericId(i64),
    /// Detail page URL
    DetailUrl(String),
}

/// A typed pointer to a portal entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub identifier: String,
    pub source: EntitySource,
}

impl EntityRef {
    /// Reference by numeric portal id
    pub fn numeric(entity_type: EntityType, id: i64) -> Self {
        Self {
            entity_type,
            identifier: id.to_string(),
            source: EntitySource::NumericId(id),
        }
    }

    /// Reference by detail URL, with the identifier already resolved from it
    pub fn from_url(
        entity_type: EntityType,
        identifier: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            identifier: identifier.into(),
            source: EntitySource::DetailUrl(url.into()),
        }
    }
}

// Identity is (entity_type, identifier); the source is provenance only.
impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type && self.identifier == other.identifier
    }
}

impl Eq for EntityRef {}

impl std::hash::Hash for EntityRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.entity_type.hash(state);
        self.identifier.hash(state);
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity_type, self.identifier)
    }
}

/// Builds the identifier of an entity that only exists relative to others
///
/// Memberships (person + organization), consultations (agenda item + paper)
/// and auxiliary files (two path tokens) have no id of their own on the
/// portal. Their identifier is the textual parts joined with `-`, so the same
/// parents always yield the same key and record upserts stay idempotent.
///
/// ```
/// use ris_harvester::entity::composite_key;
///
/// assert_eq!(composite_key(&[&17, &"SPD"]), "17-SPD");
/// ```
pub fn composite_key(parts: &[&dyn fmt::Display]) -> String {
    parts
        .iter()
        .map(|part| part.to_string())
        .collect::<Vec<_>>()
        .join("-")
}
