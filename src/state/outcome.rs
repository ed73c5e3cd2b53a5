/// Outcome definitions for a single target within a run
use std::fmt;

/// Why a target failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// 429/503/timeouts that exhausted the attempt ceiling
    Transient,

    /// 403s or robots.txt disallow; the host is backed off, not the batch
    Hostile,

    /// The host's circuit breaker was open
    BreakerOpen,

    /// Still logged out after the single re-login attempt
    AuthExpired,

    /// 404/410; the resource is gone
    Missing,

    /// Any other permanent failure: non-retryable HTTP status, bad URL or
    /// unusable response
    Fatal,

    /// The content sink reported an error
    Sink,
}

impl FailureClass {
    /// Returns true if this class should make the process exit non-zero
    ///
    /// Hostile hosts and open breakers are skipped for the rest of the run
    /// rather than counted against it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Hostile | Self::BreakerOpen)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Hostile => "hostile",
            Self::BreakerOpen => "breaker_open",
            Self::AuthExpired => "auth_expired",
            Self::Missing => "missing",
            Self::Fatal => "fatal",
            Self::Sink => "sink",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents how the orchestrator finished with a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    /// New content was handed to the sink and logged
    Processed,

    /// 304, identical body, or identical normalized hash
    SkippedUnchanged,

    /// The sink could not find what it was looking for; not a fetch failure
    SkippedParseMiss { reason: String },

    /// The target failed; the batch continues
    Failed { class: FailureClass, message: String },
}

impl TargetOutcome {
    pub fn failed(class: FailureClass, message: impl Into<String>) -> Self {
        Self::Failed {
            class,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Processed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::SkippedUnchanged | Self::SkippedParseMiss { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processed => write!(f, "processed"),
            Self::SkippedUnchanged => write!(f, "skipped (unchanged)"),
            Self::SkippedParseMiss { reason } => write!(f, "skipped (parse miss: {})", reason),
            Self::Failed { class, message } => write!(f, "failed ({}): {}", class, message),
        }
    }
}
