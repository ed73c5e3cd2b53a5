//! Delta-Harvest: a differential, rate-limited collection engine
//!
//! This crate implements a polite fetcher that backs off per host, skips
//! content it has already seen (conditional GET plus normalized content
//! hashes), remembers crawl state across runs, and only reruns expensive
//! discovery passes when a refresh policy says so.

pub mod config;
pub mod crawler;
pub mod discovery;
pub mod fetch;
pub mod output;
pub mod refresh;
pub mod robots;
pub mod session;
pub mod state;
pub mod storage;
pub mod throttle;
pub mod url;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Delta-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Circuit breaker open for {host} (retry in {retry_in:?})")]
    BreakerOpen { host: String, retry_in: Duration },

    #[error("Session expired for {url} and re-login did not restore it")]
    AuthExpired { url: String },

    #[error("Login failed: {0}")]
    Login(String),

    #[error("URL disallowed by robots.txt: {url}")]
    RobotsDenied { url: String },

    #[error("No persisted identifier set for '{key}' and refresh was skipped")]
    MissingIdSet { key: String },

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Content sink error for {resource_id}: {message}")]
    Sink {
        resource_id: String,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Returns true if the error means the run cannot continue safely
    ///
    /// Only state-store failures qualify: the skip-on-unchanged guarantee
    /// depends on every processed item being durably logged.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Database(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Identifier file {path} is unusable: {message}")]
    IdFile { path: String, message: String },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Missing host in URL: {0}")]
    MissingHost(String),

    #[error("URL template '{0}' must contain an {{id}} placeholder")]
    MissingIdPlaceholder(String),
}

/// Result type alias for Delta-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Orchestrator, RunSummary};
pub use refresh::{needs_refresh, RefreshPolicy};
pub use state::{FetchTarget, TargetKind, TargetOutcome};
pub use storage::StateStore;
