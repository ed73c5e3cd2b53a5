use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Reads, parses and validates the configuration at `path`
///
/// # Arguments
///
/// * `path` - Path to a TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - A configuration that passed validation
/// * `Err(ConfigError)` - The file could not be read, is not valid TOML, or
///   failed validation
///
/// # Example
///
/// ```no_run
/// use delta_harvest::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("{} workers", config.engine.workers);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// SHA-256 of the configuration file's bytes, hex encoded
///
/// Stored with every run record so reruns under a changed configuration
/// can be told apart in reporting.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    Ok(hash_content(&std::fs::read(path)?))
}

/// Loads a configuration together with the hash of exactly the bytes parsed
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, hash_content(content.as_bytes())))
}

fn hash_content(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
