use crate::config::types::{Config, ConfigFile};
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and validates a configuration file with all of its bodies
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(ConfigFile)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let file: ConfigFile = toml::from_str(&content)?;
    validate(&file)?;
    Ok(file)
}

/// Loads the configuration for a single body
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
/// * `body_uid` - The uid of the `[[body]]` entry to select
///
/// # Returns
///
/// * `Ok(Config)` - Immutable configuration for the selected body
/// * `Err(ConfigError::UnknownBody)` - No body with that uid exists
pub fn load_body_config(path: &Path, body_uid: &str) -> Result<Config, ConfigError> {
    let file = load_config_file(path)?;
    select_body(file, body_uid)
}

pub(crate) fn select_body(file: ConfigFile, body_uid: &str) -> Result<Config, ConfigError> {
    let ConfigFile { output, bodies } = file;
    let body = bodies
        .into_iter()
        .find(|body| body.uid == body_uid)
        .ok_or_else(|| ConfigError::UnknownBody(body_uid.to_string()))?;

    Ok(Config { output, body })
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so that runs can be correlated with the configuration
/// they used.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
