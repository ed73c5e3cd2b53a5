//! Batch orchestration
//!
//! This module ties the components together:
//! - [`RequestGate`]: robots.txt, per-host admission, retries and re-login
//! - [`ContentSink`]: the downstream parse/store seam
//! - [`Orchestrator`]: the bounded worker pool draining the target queue
//! - [`RunSummary`]: end-of-run counts and failures

mod coordinator;
mod gate;
mod sink;
mod summary;

pub use coordinator::{classify_failure, Orchestrator, StopHandle};
pub use gate::RequestGate;
pub use sink::{ContentSink, DirectorySink, SinkOutcome};
pub use summary::{RunSummary, TargetFailure};

use crate::config::Config;
use crate::Result;

/// Runs one complete harvest described by `config`
///
/// Opens the state store, resolves targets (running discovery only when the
/// refresh policy requires it) and drains them.
///
/// # Example
///
/// ```no_run
/// use delta_harvest::config::load_config_with_hash;
/// use delta_harvest::crawler::harvest;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("harvest.toml"))?;
/// let summary = harvest(&config, &hash).await?;
/// println!("{}", summary);
/// # Ok(())
/// # }
/// ```
pub async fn harvest(config: &Config, config_hash: &str) -> Result<RunSummary> {
    Orchestrator::from_config(config, config_hash)?.run().await
}
