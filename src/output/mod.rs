//! Output module for reporting on harvest state
//!
//! Read-only: nothing here writes to the state store. Downstream consumers
//! use these queries to answer questions like "how many resources changed
//! since X".

pub mod stats;

pub use stats::{load_statistics, print_statistics, HarvestStatistics};

use crate::crawler::RunSummary;

/// Prints an end-of-run summary to stdout
pub fn print_run_summary(summary: &RunSummary) {
    match summary.run_id {
        Some(id) => println!("=== Run {} ===\n", id),
        None => println!("=== Run ===\n"),
    }
    print!("{}", summary);
}
