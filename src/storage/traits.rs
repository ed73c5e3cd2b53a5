//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{CacheEntry, RefreshPolicyState, RunCounts, RunRecord, RunStatus, ScrapeLogEntry};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("State store lock poisoned by a panicked worker")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines every persistence operation the engine needs. Writes
/// take `&mut self`; callers share a backend through [`crate::storage::StateStore`].
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new run in the `running` state and returns its ID
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Marks a run finished with its final counts
    fn finish_run(&mut self, run_id: i64, status: RunStatus, counts: &RunCounts)
        -> StorageResult<()>;

    // ===== Scrape Log =====

    /// Most recent entry for `(resource_id, url, sub_index)`
    fn latest_log_entry(
        &self,
        resource_id: &str,
        url: &str,
        sub_index: u32,
    ) -> StorageResult<Option<ScrapeLogEntry>>;

    /// Appends an entry; the only write the log ever receives
    fn append_log_entry(&mut self, entry: &ScrapeLogEntry) -> StorageResult<i64>;

    /// Every entry for a resource, oldest first
    fn log_history(&self, resource_id: &str) -> StorageResult<Vec<ScrapeLogEntry>>;

    fn count_log_entries(&self) -> StorageResult<u64>;

    fn count_distinct_resources(&self) -> StorageResult<u64>;

    fn count_entries_since(&self, since: DateTime<Utc>) -> StorageResult<u64>;

    /// Resource IDs with at least one entry at or after `since`
    fn changed_resources_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<String>>;

    // ===== Refresh Policy =====

    fn get_refresh_state(&self, key: &str) -> StorageResult<Option<RefreshPolicyState>>;

    fn list_refresh_states(&self) -> StorageResult<Vec<RefreshPolicyState>>;

    /// The ID set committed with the last refresh of `key`, in discovery order
    fn load_refresh_ids(&self, key: &str) -> StorageResult<Vec<String>>;

    /// Replaces the ID set and `last_refresh_at` of `key` in one transaction
    fn commit_refresh(
        &mut self,
        key: &str,
        ids: &[String],
        refreshed_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    // ===== Conditional Cache =====

    fn get_cache_entry(&self, url: &str) -> StorageResult<Option<CacheEntry>>;

    /// Inserts or overwrites the entry for `entry.url`
    fn put_cache_entry(&mut self, entry: &CacheEntry) -> StorageResult<()>;

    /// Refreshes `fetched_at` without touching the validators or hash
    fn touch_cache_entry(&mut self, url: &str, fetched_at: DateTime<Utc>) -> StorageResult<()>;
}
