//! Configuration module for Delta-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use delta_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Workers: {}", config.engine.workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, DiscoveryConfig, EngineConfig, OutputConfig, RateLimitConfig, SessionConfig,
    UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
