//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the harvester, including:
//! - Building the HTTP client with the configured user agent
//! - GET and form POST requests
//! - Retry logic with backoff for transient failures
//! - Classifying redirects, including redirects to an auth wall
//!
//! Fetching never returns an error: every outcome, including exhausted
//! retries, is a [`FetchOutcome`] the coordinator can branch on.

use crate::config::ScraperConfig;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

/// What kind of body a request expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Markup, decoded with the charset the server announces
    Text,
    /// Raw bytes (downloaded files)
    Binary,
}

/// A single HTTP request against the portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    /// Form fields; when present the request is sent as a POST
    pub form: Option<Vec<(String, String)>>,
    pub body: BodyKind,
}

impl PageRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            form: None,
            body: BodyKind::Text,
        }
    }

    pub fn post(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            form: Some(form),
            body: BodyKind::Text,
        }
    }

    /// Expects a binary body instead of markup
    ///
    /// Binary requests are file downloads: a redirect to the document itself
    /// counts as success, only the auth wall stays a redirect.
    pub fn binary(mut self) -> Self {
        self.body = BodyKind::Binary;
        self
    }
}

/// Body of a successful response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Binary(Vec<u8>),
}

/// A successfully fetched page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    /// Content-Type header value, without parameters
    pub content_type: Option<String>,
    pub content: Content,
}

impl FetchedPage {
    /// Markup of a text response; binary responses have none
    pub fn text(&self) -> &str {
        match &self.content {
            Content::Text(text) => text,
            Content::Binary(_) => "",
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.content {
            Content::Text(text) => text.as_bytes(),
            Content::Binary(bytes) => bytes,
        }
    }
}

/// Result of a fetch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was served at the requested URL
    Success(FetchedPage),

    /// The server redirected elsewhere
    Redirected {
        final_url: String,
        /// The redirect target is the portal's access-control page
        requires_auth: bool,
    },

    /// The page could not be fetched
    Failure { reason: String },
}

/// Why a single attempt failed
#[derive(Debug)]
enum AttemptError {
    /// Worth another attempt after backing off
    Transient(String),
    /// Retrying cannot help
    Permanent(String),
}

/// HTTP fetcher with retry, backoff and politeness delay
pub struct Fetcher {
    client: Client,
    wait_time: Duration,
    backoff: Duration,
    max_attempts: u32,
    auth_wall_marker: String,
}

/// Builds an HTTP client with proper configuration
///
/// Redirects are followed (the final URL is compared with the requested one
/// afterwards to classify them).
pub fn build_http_client(config: &ScraperConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

impl Fetcher {
    /// Creates a fetcher from the scraper configuration
    pub fn new(config: &ScraperConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_http_client(config)?, config))
    }

    pub fn with_client(client: Client, config: &ScraperConfig) -> Self {
        let wait_time = config.wait_duration();
        Self {
            client,
            wait_time,
            backoff: wait_time * config.retry.backoff_factor,
            max_attempts: config.retry.max_attempts.max(1),
            auth_wall_marker: config.auth_wall_marker().to_string(),
        }
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// Fetches a request, retrying transient failures
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Connect error, timeout, reset, body read error | Retry after backoff |
    /// | HTTP 5xx | Retry after backoff |
    /// | HTTP 4xx | Immediate failure |
    /// | Invalid URL, too many redirects | Immediate failure |
    ///
    /// After `max_attempts` attempts the URL is given up with a critical log
    /// line and a `Failure` outcome.
    pub async fn fetch(&self, request: &PageRequest) -> FetchOutcome {
        let requested = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(e) => {
                return FetchOutcome::Failure {
                    reason: format!("invalid URL {}: {}", request.url, e),
                }
            }
        };

        let mut attempt = 1;
        loop {
            match self.attempt(&requested, request).await {
                Ok(page) => return self.classify(&requested, request.body, page),
                Err(AttemptError::Permanent(reason)) => {
                    tracing::warn!("Giving up on {}: {}", request.url, reason);
                    return FetchOutcome::Failure { reason };
                }
                Err(AttemptError::Transient(reason)) => {
                    if attempt >= self.max_attempts {
                        tracing::error!(
                            "CRITICAL: HTTP error while getting {} after {} attempts: {}",
                            request.url,
                            attempt,
                            reason
                        );
                        return FetchOutcome::Failure {
                            reason: format!("{} (after {} attempts)", reason, attempt),
                        };
                    }

                    tracing::info!(
                        "Connection problem while getting {} ({}), try again ({}/{})",
                        request.url,
                        reason,
                        attempt,
                        self.max_attempts
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Waits the politeness delay, then fetches
    ///
    /// Used for every request that follows another one in a dependent
    /// sequence, e.g. a file download after its paper.
    pub async fn fetch_polite(&self, request: &PageRequest) -> FetchOutcome {
        tokio::time::sleep(self.wait_time).await;
        self.fetch(request).await
    }

    async fn attempt(&self, url: &Url, request: &PageRequest) -> Result<FetchedPage, AttemptError> {
        let builder = match &request.form {
            Some(form) => self.client.post(url.clone()).form(form),
            None => self.client.get(url.clone()),
        };

        let response = builder.send().await.map_err(classify_error)?;
        let status = response.status();

        if status.is_server_error() {
            return Err(AttemptError::Transient(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(AttemptError::Permanent(describe_status(status)));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty());

        let content = match request.body {
            BodyKind::Text => Content::Text(response.text().await.map_err(classify_error)?),
            BodyKind::Binary => {
                Content::Binary(response.bytes().await.map_err(classify_error)?.to_vec())
            }
        };

        Ok(FetchedPage {
            final_url,
            content_type,
            content,
        })
    }

    fn classify(&self, requested: &Url, body: BodyKind, page: FetchedPage) -> FetchOutcome {
        if page.final_url == requested.as_str() {
            return FetchOutcome::Success(page);
        }

        let requires_auth = is_auth_wall(&page.final_url, &self.auth_wall_marker);
        if body == BodyKind::Binary && !requires_auth {
            tracing::debug!("Download {} redirected to {}", requested, page.final_url);
            return FetchOutcome::Success(page);
        }
        FetchOutcome::Redirected {
            final_url: page.final_url,
            requires_auth,
        }
    }
}

/// Returns true if the URL's path contains the auth-wall marker
fn is_auth_wall(url: &str, marker: &str) -> bool {
    if marker.is_empty() {
        return false;
    }
    match Url::parse(url) {
        Ok(parsed) => parsed.path().contains(marker),
        Err(_) => url.contains(marker),
    }
}

fn classify_error(e: reqwest::Error) -> AttemptError {
    if e.is_timeout() {
        AttemptError::Transient("request timeout".to_string())
    } else if e.is_connect() {
        AttemptError::Transient(format!("connection error: {}", e))
    } else if e.is_redirect() || e.is_builder() {
        AttemptError::Permanent(e.to_string())
    } else {
        // Resets mid-request and truncated bodies end up here
        AttemptError::Transient(e.to_string())
    }
}

fn describe_status(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {}", status.as_u16(), reason),
        None => format!("HTTP {}", status.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PortalKind, RetryConfig, UrlTemplates};

    fn create_test_config() -> ScraperConfig {
        ScraperConfig {
            kind: PortalKind::Allris,
            base_url: "https://ris.example.org/bi/".to_string(),
            user_agent: "TestHarvester/1.0".to_string(),
            wait_time: 200,
            auth_wall_marker: None,
            retry: RetryConfig::default(),
            urls: UrlTemplates::default(),
        }
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&create_test_config()).is_ok());
    }

    #[test]
    fn test_backoff_is_wait_time_times_factor() {
        let fetcher = Fetcher::new(&create_test_config()).unwrap();
        assert_eq!(fetcher.wait_time(), Duration::from_millis(200));
        assert_eq!(fetcher.backoff, Duration::from_millis(1000));
        assert_eq!(fetcher.max_attempts, 4);
    }

    #[test]
    fn test_is_auth_wall() {
        assert!(is_auth_wall(
            "https://ris.example.org/bi/noauth.asp?x=1",
            "noauth"
        ));
        assert!(!is_auth_wall(
            "https://ris.example.org/bi/vo020.asp?ref=noauth",
            "noauth"
        ));
        assert!(!is_auth_wall("https://ris.example.org/bi/noauth.asp", ""));
    }

    #[test]
    fn test_page_request_builders() {
        let get = PageRequest::get("https://ris.example.org/bi/kp020.asp");
        assert!(get.form.is_none());
        assert_eq!(get.body, BodyKind::Text);

        let post = PageRequest::post(
            "https://ris.example.org/bi/do027.asp",
            vec![("DOLFDNR".to_string(), "881".to_string())],
        )
        .binary();
        assert!(post.form.is_some());
        assert_eq!(post.body, BodyKind::Binary);
    }

    #[tokio::test]
    async fn test_invalid_url_is_failure() {
        let fetcher = Fetcher::new(&create_test_config()).unwrap();
        let outcome = fetcher.fetch(&PageRequest::get("not a url")).await;
        assert!(matches!(outcome, FetchOutcome::Failure { .. }));
    }

    fn redirected_page(final_url: &str) -> FetchedPage {
        FetchedPage {
            final_url: final_url.to_string(),
            content_type: Some("application/pdf".to_string()),
            content: Content::Binary(vec![0x25, 0x50, 0x44, 0x46]),
        }
    }

    #[test]
    fn test_redirected_download_is_success() {
        let fetcher = Fetcher::new(&create_test_config()).unwrap();
        let requested = Url::parse("https://ris.example.org/bi/do027.asp").unwrap();
        let target = "https://ris.example.org/bi/___tmp/tmp/881.pdf";

        match fetcher.classify(&requested, BodyKind::Binary, redirected_page(target)) {
            FetchOutcome::Success(page) => assert_eq!(page.final_url, target),
            other => panic!("expected success, got {:?}", other),
        }
        assert!(matches!(
            fetcher.classify(&requested, BodyKind::Text, redirected_page(target)),
            FetchOutcome::Redirected {
                requires_auth: false,
                ..
            }
        ));
    }

    #[test]
    fn test_redirected_download_to_auth_wall_stays_redirect() {
        let fetcher = Fetcher::new(&create_test_config()).unwrap();
        let requested = Url::parse("https://ris.example.org/bi/do027.asp").unwrap();
        let outcome = fetcher.classify(
            &requested,
            BodyKind::Binary,
            redirected_page("https://ris.example.org/bi/noauth.asp"),
        );
        assert!(matches!(
            outcome,
            FetchOutcome::Redirected {
                requires_auth: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_failure_after_retries() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = create_test_config();
        config.wait_time = 1;
        config.retry = RetryConfig {
            max_attempts: 3,
            backoff_factor: 1,
            parse_retries: 0,
        };
        let fetcher = Fetcher::new(&config).unwrap();

        let url = format!("http://127.0.0.1:{}/bi/vo020.asp", port);
        match fetcher.fetch(&PageRequest::get(url)).await {
            FetchOutcome::Failure { reason } => {
                assert!(reason.contains("connection"));
                assert!(reason.ends_with("(after 3 attempts)"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_fetched_page_accessors() {
        let page = FetchedPage {
            final_url: "https://ris.example.org/".to_string(),
            content_type: Some("application/pdf".to_string()),
            content: Content::Binary(vec![1, 2, 3]),
        };
        assert_eq!(page.text(), "");
        assert_eq!(page.bytes(), &[1, 2, 3]);
    }
}
