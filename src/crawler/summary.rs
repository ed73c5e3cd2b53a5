//! End-of-run accounting

use crate::state::{FailureClass, FetchTarget, TargetOutcome};
use crate::storage::RunCounts;
use std::fmt;

/// One target that failed during the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub target: FetchTarget,
    pub class: FailureClass,
    pub message: String,
}

/// Totals for one orchestrator pass, plus every failure
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: Option<i64>,
    pub processed: u64,
    pub skipped_unchanged: u64,
    pub parse_misses: u64,
    pub failures: Vec<TargetFailure>,
    /// The run was stopped before the queue drained
    pub interrupted: bool,
}

impl RunSummary {
    pub fn new(run_id: i64) -> Self {
        Self {
            run_id: Some(run_id),
            ..Self::default()
        }
    }

    pub fn record(&mut self, target: &FetchTarget, outcome: &TargetOutcome) {
        match outcome {
            TargetOutcome::Processed => self.processed += 1,
            TargetOutcome::SkippedUnchanged => self.skipped_unchanged += 1,
            TargetOutcome::SkippedParseMiss { .. } => self.parse_misses += 1,
            TargetOutcome::Failed { class, message } => self.failures.push(TargetFailure {
                target: target.clone(),
                class: *class,
                message: message.clone(),
            }),
        }
    }

    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    /// Targets finished so far, whatever their outcome
    pub fn total(&self) -> u64 {
        self.processed + self.skipped_unchanged + self.parse_misses + self.failed()
    }

    /// The three counts stored with the run record
    pub fn counts(&self) -> RunCounts {
        RunCounts {
            processed: self.processed,
            skipped_unchanged: self.skipped_unchanged,
            failed: self.failed(),
        }
    }

    /// True if any failure should make the process exit non-zero
    pub fn has_fatal(&self) -> bool {
        self.failures.iter().any(|f| f.class.is_fatal())
    }

    pub fn failures_of(&self, class: FailureClass) -> usize {
        self.failures.iter().filter(|f| f.class == class).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "processed: {}, skipped (unchanged): {}, failed: {}",
            self.processed,
            self.skipped_unchanged,
            self.failed()
        )?;
        if self.parse_misses > 0 {
            writeln!(f, "parse misses: {}", self.parse_misses)?;
        }
        if self.interrupted {
            writeln!(f, "run was interrupted before the queue drained")?;
        }
        for failure in &self.failures {
            writeln!(
                f,
                "  [{}] {}: {}",
                failure.class, failure.target, failure.message
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TargetKind;

    fn target(id: &str) -> FetchTarget {
        FetchTarget::new(id, format!("https://x.test/{}", id), 0, TargetKind::Listed)
    }

    #[test]
    fn test_counts() {
        let mut summary = RunSummary::new(1);
        summary.record(&target("a"), &TargetOutcome::Processed);
        summary.record(&target("b"), &TargetOutcome::SkippedUnchanged);
        summary.record(
            &target("c"),
            &TargetOutcome::SkippedParseMiss {
                reason: "no table".to_string(),
            },
        );
        summary.record(
            &target("d"),
            &TargetOutcome::failed(FailureClass::BreakerOpen, "open"),
        );

        assert_eq!(
            summary.counts(),
            RunCounts {
                processed: 1,
                skipped_unchanged: 1,
                failed: 1
            }
        );
        assert_eq!(summary.total(), 4);
        assert!(!summary.has_fatal());

        summary.record(
            &target("e"),
            &TargetOutcome::failed(FailureClass::Transient, "HTTP 503"),
        );
        assert!(summary.has_fatal());
        assert_eq!(summary.failures_of(FailureClass::Transient), 1);
    }
}
