//! Statistics generation from the state store
//!
//! This module provides read-only reporting over the scrape log, the
//! refresh-policy table and the run records.

use crate::storage::{RefreshPolicyState, RunRecord, StateStore, StorageResult};
use chrono::{DateTime, Utc};

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Total scrape-log entries ever appended
    pub total_entries: u64,

    /// Distinct resources with at least one entry
    pub distinct_resources: u64,

    /// Reporting window start, if one was requested
    pub since: Option<DateTime<Utc>>,

    /// Entries appended since `since`
    pub entries_since: u64,

    /// Resources whose content changed since `since`
    pub changed_resources: Vec<String>,

    /// One row per discovery aggregate
    pub refresh_states: Vec<RefreshPolicyState>,

    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from the store
///
/// Without `since`, the window-based fields cover the whole log.
pub fn load_statistics(
    store: &StateStore,
    since: Option<DateTime<Utc>>,
) -> StorageResult<HarvestStatistics> {
    let total_entries = store.count_log_entries()?;
    let distinct_resources = store.count_distinct_resources()?;

    let (entries_since, changed_resources) = match since {
        Some(since) => (
            store.count_entries_since(since)?,
            store.changed_resources_since(since)?,
        ),
        None => (total_entries, Vec::new()),
    };

    Ok(HarvestStatistics {
        total_entries,
        distinct_resources,
        since,
        entries_since,
        changed_resources,
        refresh_states: store.list_refresh_states()?,
        latest_run: store.latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Scrape log:");
    println!("  Entries: {}", stats.total_entries);
    println!("  Distinct resources: {}", stats.distinct_resources);
    println!();

    if let Some(since) = stats.since {
        println!("Since {}:", since.to_rfc3339());
        println!("  New entries: {}", stats.entries_since);
        println!("  Changed resources: {}", stats.changed_resources.len());
        for resource in &stats.changed_resources {
            println!("    - {}", resource);
        }
        println!();
    }

    if !stats.refresh_states.is_empty() {
        println!("Discovery refreshes:");
        for state in &stats.refresh_states {
            println!("  {}: {}", state.key, state.last_refresh_at.to_rfc3339());
        }
        println!();
    }

    match &stats.latest_run {
        Some(run) => {
            println!("Latest run (#{}):", run.id);
            println!("  Status: {}", run.status.to_db_string());
            println!("  Started: {}", run.started_at.to_rfc3339());
            if let Some(finished) = run.finished_at {
                let duration = finished - run.started_at;
                println!(
                    "  Finished: {} ({}s)",
                    finished.to_rfc3339(),
                    duration.num_seconds()
                );
            }
            println!(
                "  Processed: {}, skipped (unchanged): {}, failed: {}",
                run.counts.processed, run.counts.skipped_unchanged, run.counts.failed
            );
        }
        None => println!("No runs recorded yet"),
    }
}
