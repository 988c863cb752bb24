use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// On-disk configuration file: shared output settings plus one entry per body
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub output: OutputConfig,
    #[serde(default, rename = "body")]
    pub bodies: Vec<BodyConfig>,
}

/// Immutable configuration for a single harvesting run
///
/// Built once at startup by [`crate::config::load_body_config`] and shared
/// with the fetcher, the frontiers and the coordinator.
#[derive(Debug, Clone)]
pub struct Config {
    pub output: OutputConfig,
    pub body: BodyConfig,
}

impl Config {
    pub fn scraper(&self) -> &ScraperConfig {
        &self.body.scraper
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.body.scraper.retry
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// One council body (a single portal installation)
#[derive(Debug, Clone, Deserialize)]
pub struct BodyConfig {
    /// Short unique identifier used on the command line and in queue names
    pub uid: String,

    /// Human readable name of the body
    #[serde(default)]
    pub name: String,

    pub scraper: ScraperConfig,

    /// Maps party spellings found on the portal to a canonical name
    #[serde(default, rename = "party-alias")]
    pub party_alias: HashMap<String, String>,

    /// MIME type to filename extension table for downloaded files
    #[serde(default, rename = "file-extensions")]
    pub file_extensions: Vec<FileExtension>,
}

impl BodyConfig {
    /// Looks up the filename extension registered for a MIME type
    pub fn extension_for(&self, mime_type: &str) -> Option<&str> {
        self.file_extensions
            .iter()
            .find(|entry| entry.mime_type == mime_type)
            .map(|entry| entry.extension.as_str())
    }
}

/// Portal software running at a body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum PortalKind {
    #[serde(rename = "allris")]
    Allris,
    #[serde(rename = "sessionnet", alias = "sessionnet-asp", alias = "sessionnet-php")]
    SessionNet,
}

impl PortalKind {
    /// Prefix used for the persisted queue names of this portal type
    pub fn queue_prefix(&self) -> &'static str {
        match self {
            Self::Allris => "ALLRIS",
            Self::SessionNet => "SESSIONNET",
        }
    }

    /// Path segment the portal redirects to when content is access-restricted
    pub fn default_auth_wall_marker(&self) -> &'static str {
        match self {
            Self::Allris => "noauth",
            Self::SessionNet => "login",
        }
    }
}

/// Scraper behaviour for one body
#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    #[serde(rename = "type")]
    pub kind: PortalKind,

    /// Base URL of the portal, ending with a slash
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// User agent sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Politeness delay between dependent requests (milliseconds)
    #[serde(rename = "wait-time", default = "default_wait_time")]
    pub wait_time: u64,

    /// Overrides the portal's default auth-wall path segment
    #[serde(rename = "auth-wall-marker", default)]
    pub auth_wall_marker: Option<String>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub urls: UrlTemplates,
}

impl ScraperConfig {
    pub fn wait_duration(&self) -> Duration {
        Duration::from_millis(self.wait_time)
    }

    pub fn auth_wall_marker(&self) -> &str {
        self.auth_wall_marker
            .as_deref()
            .unwrap_or_else(|| self.kind.default_auth_wall_marker())
    }
}

/// Retry and backoff parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total fetch attempts on transient network failures
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff between fetch attempts is `wait-time * backoff-factor`
    #[serde(rename = "backoff-factor", default = "default_backoff_factor")]
    pub backoff_factor: u32,

    /// Extra fetch+parse rounds for detail pages that come back truncated
    #[serde(rename = "parse-retries", default = "default_parse_retries")]
    pub parse_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_factor: default_backoff_factor(),
            parse_retries: default_parse_retries(),
        }
    }
}

/// Optional URL templates overriding the portal defaults
///
/// Templates may use the placeholders `{base}`, `{id}`, `{start}` and `{end}`;
/// SessionNet meeting calendars use `{year}` and `{month}` instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UrlTemplates {
    #[serde(rename = "person-list", default)]
    pub person_list: Option<String>,
    #[serde(rename = "person-detail", default)]
    pub person_detail: Option<String>,
    #[serde(rename = "organization-detail", default)]
    pub organization_detail: Option<String>,
    #[serde(rename = "meeting-search", default)]
    pub meeting_search: Option<String>,
    #[serde(rename = "meeting-detail", default)]
    pub meeting_detail: Option<String>,
    #[serde(rename = "agenda-item-detail", default)]
    pub agenda_item_detail: Option<String>,
    #[serde(rename = "paper-detail", default)]
    pub paper_detail: Option<String>,
    #[serde(rename = "file-download", default)]
    pub file_download: Option<String>,
}

/// One row of the MIME type to extension table
#[derive(Debug, Clone, Deserialize)]
pub struct FileExtension {
    #[serde(rename = "mime-type")]
    pub mime_type: String,
    pub extension: String,
}

fn default_user_agent() -> String {
    format!("ris-harvester/{}", env!("CARGO_PKG_VERSION"))
}

fn default_wait_time() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_factor() -> u32 {
    5
}

fn default_parse_retries() -> u32 {
    3
}
