use crate::config::types::{BodyConfig, ConfigFile, OutputConfig, RetryConfig, ScraperConfig};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration file
pub fn validate(file: &ConfigFile) -> Result<(), ConfigError> {
    validate_output_config(&file.output)?;

    if file.bodies.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[body]] entry is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for body in &file.bodies {
        validate_body(body)?;
        if !seen.insert(body.uid.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate body uid '{}'",
                body.uid
            )));
        }
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_body(body: &BodyConfig) -> Result<(), ConfigError> {
    // The uid becomes part of every queue name
    if body.uid.is_empty() {
        return Err(ConfigError::Validation(
            "body uid cannot be empty".to_string(),
        ));
    }

    if !body
        .uid
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "body uid must contain only alphanumeric characters, hyphens and underscores, got '{}'",
            body.uid
        )));
    }

    validate_scraper_config(&body.uid, &body.scraper)?;

    for entry in &body.file_extensions {
        if entry.mime_type.is_empty() || entry.extension.is_empty() {
            return Err(ConfigError::Validation(format!(
                "body '{}': file extension entries need both mime-type and extension",
                body.uid
            )));
        }
    }

    Ok(())
}

fn validate_scraper_config(uid: &str, config: &ScraperConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("body '{}': invalid base-url: {}", uid, e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "body '{}': base-url must use http or https, got '{}'",
            uid,
            url.scheme()
        )));
    }

    // Templates are appended to the base URL verbatim
    if !config.base_url.ends_with('/') {
        return Err(ConfigError::Validation(format!(
            "body '{}': base-url must end with '/'",
            uid
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "body '{}': user-agent cannot be empty",
            uid
        )));
    }

    validate_retry_config(uid, &config.retry)
}

fn validate_retry_config(uid: &str, config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 || config.max_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "body '{}': max-attempts must be between 1 and 20, got {}",
            uid, config.max_attempts
        )));
    }

    if config.parse_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "body '{}': parse-retries must be at most 10, got {}",
            uid, config.parse_retries
        )));
    }

    Ok(())
}
