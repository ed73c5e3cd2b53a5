//! HTTP fetching
//!
//! This module handles all HTTP traffic for the engine, including:
//! - The [`HttpTransport`] seam and its reqwest implementation
//! - Classifying responses into typed retry outcomes
//! - Rotating client identities
//! - ETag / Last-Modified conditional fetching with a persisted cache

mod cache;
mod client;

pub use cache::{ConditionalCache, FetchOutcome};
pub use client::{
    classify_status, parse_retry_after, HttpTransport, OutboundRequest, RawResponse,
    ReqwestTransport, UserAgentPool, Validators,
};
pub use crate::storage::CacheEntry;

use crate::throttle::RequestOutcome;
use std::time::Duration;
use thiserror::Error;

/// Typed outcome of a failed fetch
///
/// Retry policy is a decision over this value rather than over exceptions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// 429/503/5xx/timeouts: worth retrying after a backoff
    #[error("Retryable failure for {url}: {reason}")]
    Retryable {
        url: String,
        reason: String,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },

    /// 403: the host is refusing us
    #[error("Hostile response from {url}: {reason}")]
    Hostile {
        url: String,
        reason: String,
        status: Option<u16>,
    },

    /// 404/410: the resource does not exist
    #[error("Resource missing at {url} (HTTP {status})")]
    Missing { url: String, status: u16 },

    /// Anything else that will not get better by retrying
    #[error("Fatal failure for {url}: {reason}")]
    Fatal {
        url: String,
        reason: String,
        status: Option<u16>,
    },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Retryable { status, .. }
            | Self::Hostile { status, .. }
            | Self::Fatal { status, .. } => *status,
            Self::Missing { status, .. } => Some(*status),
        }
    }

    /// How the host should be charged for this error
    ///
    /// A host that answers with a definite 4xx is healthy even though the
    /// target failed, so only network-level failures, throttling and refusals
    /// count toward the breaker.
    pub fn request_outcome(&self) -> RequestOutcome {
        match self {
            Self::Retryable {
                status,
                retry_after,
                ..
            } => RequestOutcome::Failure {
                status: *status,
                retry_after: *retry_after,
            },
            Self::Hostile { status, .. } => RequestOutcome::Failure {
                status: *status,
                retry_after: None,
            },
            Self::Missing { .. } => RequestOutcome::Success,
            Self::Fatal { status: Some(_), .. } => RequestOutcome::Success,
            Self::Fatal { status: None, .. } => RequestOutcome::Failure {
                status: None,
                retry_after: None,
            },
        }
    }
}
