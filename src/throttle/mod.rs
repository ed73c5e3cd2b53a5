//! Rate limiting and circuit breaking
//!
//! This module gates every outbound request:
//! - randomized per-host spacing that widens with consecutive failures
//! - Retry-After / exponential cooldowns for 429 and 503
//! - longer cooldowns plus identity rotation for 403
//! - a per-host circuit breaker with half-open trials

mod backoff;
mod limiter;

pub use backoff::ExponentialBackoff;
pub use limiter::{Admission, OutcomeAction, RateLimitSettings, RateLimiter, RequestOutcome};
