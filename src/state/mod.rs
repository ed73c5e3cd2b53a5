//! State module for tracking collection progress
//!
//! # Components
//!
//! - `FetchTarget`: one resource page to fetch, and how it was discovered
//! - `HostState` / `CircuitBreakerState`: per-host pacing and breaker state
//! - `TargetOutcome`: how the orchestrator finished with a target

mod host_state;
mod outcome;
mod target;

pub use host_state::{BreakerCheck, BreakerPhase, CircuitBreakerState, HostState};
pub use outcome::{FailureClass, TargetOutcome};
pub use target::{FetchTarget, TargetKind};
