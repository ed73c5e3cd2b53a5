//! Storage module for persisting harvest state
//!
//! This module handles all database operations for the engine, including:
//! - SQLite database initialization and schema management
//! - The append-only scrape log and its skip-on-unchanged decision
//! - Refresh policy state and the ID sets it guards
//! - Conditional GET cache entries
//! - Run tracking
//!
//! Every mutation goes through one [`StateStore`] handle, which serializes
//! access to a single SQLite connection.

mod fingerprint;
mod schema;
mod sqlite;
mod traits;

pub use fingerprint::{content_hash, hash_bytes, normalize_content};
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::FetchTarget;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// One processed version of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeLogEntry {
    pub resource_id: String,
    pub url: String,
    pub sub_index: u32,
    pub content_hash: String,
    pub scraped_at: DateTime<Utc>,
}

/// When a named discovery aggregate was last refreshed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicyState {
    pub key: String,
    pub last_refresh_at: DateTime<Utc>,
}

/// Validators and body hash of the last fetch of a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub url: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body_hash: String,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry is too old to be trusted for a conditional request
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.fetched_at >= ttl
    }
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config_hash: String,
    pub status: RunStatus,
    pub counts: RunCounts,
}

/// The three counts every run reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub processed: u64,
    pub skipped_unchanged: u64,
    pub failed: u64,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Answer to "should this content go downstream?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDecision {
    pub process: bool,
    pub normalized_hash: String,
}

/// Shared handle to the single-writer state store
///
/// Cloning is cheap; every clone talks to the same connection.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<SqliteStorage>>,
}

impl StateStore {
    /// Opens (or creates) the database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        Ok(Self::from_storage(SqliteStorage::new(path)?))
    }

    pub fn in_memory() -> StorageResult<Self> {
        Ok(Self::from_storage(SqliteStorage::new_in_memory()?))
    }

    pub fn from_storage(storage: SqliteStorage) -> Self {
        Self {
            inner: Arc::new(Mutex::new(storage)),
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }

    // ===== Differential skip =====

    /// Decides whether `raw_content` for `target` is new
    ///
    /// Read-only: nothing is appended until [`StateStore::commit_processed`].
    /// With `only_new` off every item is processed.
    ///
    /// # Arguments
    ///
    /// * `target` - The resource, URL and sub-item being considered
    /// * `raw_content` - Body as fetched; it is normalized before hashing
    /// * `only_new` - Skip items whose normalized hash matches the last entry
    ///
    /// # Returns
    ///
    /// A [`ProcessDecision`] carrying whether to process and the normalized
    /// hash to commit with it.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use delta_harvest::{FetchTarget, StateStore, TargetKind};
    ///
    /// let store = StateStore::in_memory().unwrap();
    /// let target = FetchTarget::new("7", "https://example.com/game/7", 0, TargetKind::Supplied);
    /// let decision = store.should_process(&target, "<p>box score</p>", true).unwrap();
    /// assert!(decision.process);
    /// ```
    pub fn should_process(
        &self,
        target: &FetchTarget,
        raw_content: &str,
        only_new: bool,
    ) -> StorageResult<ProcessDecision> {
        let normalized_hash = content_hash(raw_content);
        if !only_new {
            return Ok(ProcessDecision {
                process: true,
                normalized_hash,
            });
        }

        let latest = self.lock()?.latest_log_entry(
            &target.resource_id,
            &target.url,
            target.sub_index,
        )?;
        let unchanged = latest.is_some_and(|entry| entry.content_hash == normalized_hash);

        Ok(ProcessDecision {
            process: !unchanged,
            normalized_hash,
        })
    }

    /// Appends the scrape-log entry for content the sink has stored
    ///
    /// The latest-hash check is repeated under the same lock as the append, so
    /// two workers racing on one key append at most once. Returns `None` when
    /// the entry would duplicate the latest one.
    pub fn commit_processed(
        &self,
        target: &FetchTarget,
        normalized_hash: &str,
        only_new: bool,
    ) -> StorageResult<Option<ScrapeLogEntry>> {
        let mut storage = self.lock()?;

        if only_new {
            let latest =
                storage.latest_log_entry(&target.resource_id, &target.url, target.sub_index)?;
            if latest.is_some_and(|entry| entry.content_hash == normalized_hash) {
                return Ok(None);
            }
        }

        let entry = ScrapeLogEntry {
            resource_id: target.resource_id.clone(),
            url: target.url.clone(),
            sub_index: target.sub_index,
            content_hash: normalized_hash.to_string(),
            scraped_at: Utc::now(),
        };
        storage.append_log_entry(&entry)?;
        Ok(Some(entry))
    }

    pub fn latest_log_entry(&self, target: &FetchTarget) -> StorageResult<Option<ScrapeLogEntry>> {
        self.lock()?
            .latest_log_entry(&target.resource_id, &target.url, target.sub_index)
    }

    pub fn log_history(&self, resource_id: &str) -> StorageResult<Vec<ScrapeLogEntry>> {
        self.lock()?.log_history(resource_id)
    }

    pub fn count_log_entries(&self) -> StorageResult<u64> {
        self.lock()?.count_log_entries()
    }

    pub fn count_distinct_resources(&self) -> StorageResult<u64> {
        self.lock()?.count_distinct_resources()
    }

    pub fn count_entries_since(&self, since: DateTime<Utc>) -> StorageResult<u64> {
        self.lock()?.count_entries_since(since)
    }

    pub fn changed_resources_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<String>> {
        self.lock()?.changed_resources_since(since)
    }

    // ===== Refresh policy =====

    pub fn refresh_state(&self, key: &str) -> StorageResult<Option<RefreshPolicyState>> {
        self.lock()?.get_refresh_state(key)
    }

    pub fn list_refresh_states(&self) -> StorageResult<Vec<RefreshPolicyState>> {
        self.lock()?.list_refresh_states()
    }

    pub fn refresh_ids(&self, key: &str) -> StorageResult<Vec<String>> {
        self.lock()?.load_refresh_ids(key)
    }

    /// Commits a new ID set together with its refresh timestamp
    pub fn commit_refresh(
        &self,
        key: &str,
        ids: &[String],
        refreshed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.lock()?.commit_refresh(key, ids, refreshed_at)
    }

    // ===== Conditional cache =====

    pub fn cache_entry(&self, url: &str) -> StorageResult<Option<CacheEntry>> {
        self.lock()?.get_cache_entry(url)
    }

    pub fn put_cache_entry(&self, entry: &CacheEntry) -> StorageResult<()> {
        self.lock()?.put_cache_entry(entry)
    }

    pub fn touch_cache_entry(&self, url: &str, fetched_at: DateTime<Utc>) -> StorageResult<()> {
        self.lock()?.touch_cache_entry(url, fetched_at)
    }

    // ===== Runs =====

    pub fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        self.lock()?.create_run(config_hash)
    }

    pub fn finish_run(&self, run_id: i64, status: RunStatus, counts: &RunCounts) -> StorageResult<()> {
        self.lock()?.finish_run(run_id, status, counts)
    }

    pub fn run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.lock()?.get_run(run_id)
    }

    pub fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        self.lock()?.get_latest_run()
    }
}
