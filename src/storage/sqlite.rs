//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    CacheEntry, RefreshPolicyState, RunCounts, RunRecord, RunStatus, ScrapeLogEntry,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically
fn to_db_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => time_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: time_column(row, 1)?,
        finished_at: optional_time_column(row, 2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
        counts: RunCounts {
            processed: row.get::<_, i64>(5)? as u64,
            skipped_unchanged: row.get::<_, i64>(6)? as u64,
            failed: row.get::<_, i64>(7)? as u64,
        },
    })
}

fn log_entry_from_row(row: &Row<'_>) -> rusqlite::Result<ScrapeLogEntry> {
    Ok(ScrapeLogEntry {
        resource_id: row.get(0)?,
        url: row.get(1)?,
        sub_index: row.get(2)?,
        content_hash: row.get(3)?,
        scraped_at: time_column(row, 4)?,
    })
}

const RUN_COLUMNS: &str =
    "id, started_at, finished_at, config_hash, status, processed, skipped_unchanged, failed";

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![
                to_db_time(Utc::now()),
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counts: &RunCounts,
    ) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE runs
             SET status = ?1, finished_at = ?2, processed = ?3, skipped_unchanged = ?4, failed = ?5
             WHERE id = ?6",
            params![
                status.to_db_string(),
                to_db_time(Utc::now()),
                counts.processed as i64,
                counts.skipped_unchanged as i64,
                counts.failed as i64,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Scrape Log =====

    fn latest_log_entry(
        &self,
        resource_id: &str,
        url: &str,
        sub_index: u32,
    ) -> StorageResult<Option<ScrapeLogEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT resource_id, url, sub_index, content_hash, scraped_at
                 FROM scrape_log
                 WHERE resource_id = ?1 AND url = ?2 AND sub_index = ?3
                 ORDER BY id DESC LIMIT 1",
                params![resource_id, url, sub_index],
                log_entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn append_log_entry(&mut self, entry: &ScrapeLogEntry) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO scrape_log (resource_id, url, sub_index, content_hash, scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.resource_id,
                entry.url,
                entry.sub_index,
                entry.content_hash,
                to_db_time(entry.scraped_at)
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn log_history(&self, resource_id: &str) -> StorageResult<Vec<ScrapeLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT resource_id, url, sub_index, content_hash, scraped_at
             FROM scrape_log WHERE resource_id = ?1 ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![resource_id], log_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn count_log_entries(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM scrape_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_distinct_resources(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT resource_id) FROM scrape_log",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_entries_since(&self, since: DateTime<Utc>) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM scrape_log WHERE scraped_at >= ?1",
            params![to_db_time(since)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn changed_resources_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT resource_id FROM scrape_log
             WHERE scraped_at >= ?1
             GROUP BY resource_id
             ORDER BY MIN(id)",
        )?;
        let ids = stmt
            .query_map(params![to_db_time(since)], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // ===== Refresh Policy =====

    fn get_refresh_state(&self, key: &str) -> StorageResult<Option<RefreshPolicyState>> {
        let state = self
            .conn
            .query_row(
                "SELECT key, last_refresh_at FROM refresh_policy WHERE key = ?1",
                params![key],
                |row| {
                    Ok(RefreshPolicyState {
                        key: row.get(0)?,
                        last_refresh_at: time_column(row, 1)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    fn list_refresh_states(&self) -> StorageResult<Vec<RefreshPolicyState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, last_refresh_at FROM refresh_policy ORDER BY key")?;
        let states = stmt
            .query_map([], |row| {
                Ok(RefreshPolicyState {
                    key: row.get(0)?,
                    last_refresh_at: time_column(row, 1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(states)
    }

    fn load_refresh_ids(&self, key: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM refresh_ids WHERE key = ?1 ORDER BY position")?;
        let ids = stmt
            .query_map(params![key], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn commit_refresh(
        &mut self,
        key: &str,
        ids: &[String],
        refreshed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM refresh_ids WHERE key = ?1", params![key])?;
        {
            let mut insert =
                tx.prepare("INSERT INTO refresh_ids (key, position, id) VALUES (?1, ?2, ?3)")?;
            for (position, id) in ids.iter().enumerate() {
                insert.execute(params![key, position as i64, id])?;
            }
        }
        tx.execute(
            "INSERT INTO refresh_policy (key, last_refresh_at) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET last_refresh_at = excluded.last_refresh_at",
            params![key, to_db_time(refreshed_at)],
        )?;

        tx.commit()?;
        Ok(())
    }

    // ===== Conditional Cache =====

    fn get_cache_entry(&self, url: &str) -> StorageResult<Option<CacheEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT url, etag, last_modified, body_hash, fetched_at
                 FROM http_cache WHERE url = ?1",
                params![url],
                |row| {
                    Ok(CacheEntry {
                        url: row.get(0)?,
                        etag: row.get(1)?,
                        last_modified: row.get(2)?,
                        body_hash: row.get(3)?,
                        fetched_at: time_column(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    fn put_cache_entry(&mut self, entry: &CacheEntry) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO http_cache (url, etag, last_modified, body_hash, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(url) DO UPDATE SET
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                body_hash = excluded.body_hash,
                fetched_at = excluded.fetched_at",
            params![
                entry.url,
                entry.etag,
                entry.last_modified,
                entry.body_hash,
                to_db_time(entry.fetched_at)
            ],
        )?;
        Ok(())
    }

    fn touch_cache_entry(&mut self, url: &str, fetched_at: DateTime<Utc>) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE http_cache SET fetched_at = ?1 WHERE url = ?2",
            params![to_db_time(fetched_at), url],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn log_entry(resource_id: &str, hash: &str, scraped_at: DateTime<Utc>) -> ScrapeLogEntry {
        ScrapeLogEntry {
            resource_id: resource_id.to_string(),
            url: format!("https://example.com/{}", resource_id),
            sub_index: 0,
            content_hash: hash.to_string(),
            scraped_at,
        }
    }

    #[test]
    fn test_run_lifecycle() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("abc123").unwrap();

        let run = storage.get_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());

        let counts = RunCounts {
            processed: 3,
            skipped_unchanged: 2,
            failed: 1,
        };
        storage
            .finish_run(run_id, RunStatus::Completed, &counts)
            .unwrap();

        let latest = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(latest.id, run_id);
        assert_eq!(latest.status, RunStatus::Completed);
        assert_eq!(latest.counts, counts);
        assert!(latest.finished_at.is_some());
    }

    #[test]
    fn test_missing_run() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        assert!(matches!(
            storage.get_run(42),
            Err(StorageError::RunNotFound(42))
        ));
    }

    #[test]
    fn test_latest_log_entry_wins() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let now = Utc::now();
        storage.append_log_entry(&log_entry("r1", "h1", now)).unwrap();
        storage.append_log_entry(&log_entry("r1", "h2", now)).unwrap();

        let latest = storage
            .latest_log_entry("r1", "https://example.com/r1", 0)
            .unwrap()
            .unwrap();
        assert_eq!(latest.content_hash, "h2");
        assert_eq!(storage.log_history("r1").unwrap().len(), 2);

        assert!(storage
            .latest_log_entry("r1", "https://example.com/r1", 1)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_changed_since_queries() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let now = Utc::now();
        storage
            .append_log_entry(&log_entry("old", "h", now - Duration::days(3)))
            .unwrap();
        storage.append_log_entry(&log_entry("new", "h", now)).unwrap();
        storage.append_log_entry(&log_entry("new", "h2", now)).unwrap();

        let since = now - Duration::days(1);
        assert_eq!(storage.count_entries_since(since).unwrap(), 2);
        assert_eq!(storage.changed_resources_since(since).unwrap(), vec!["new"]);
        assert_eq!(storage.count_log_entries().unwrap(), 3);
        assert_eq!(storage.count_distinct_resources().unwrap(), 2);
    }

    #[test]
    fn test_commit_refresh_replaces_ids() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let first = Utc::now() - Duration::days(8);
        let ids: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        storage.commit_refresh("leaders", &ids, first).unwrap();

        let second = Utc::now();
        let ids: Vec<String> = vec!["z".into(), "a".into()];
        storage.commit_refresh("leaders", &ids, second).unwrap();

        assert_eq!(storage.load_refresh_ids("leaders").unwrap(), vec!["z", "a"]);
        let state = storage.get_refresh_state("leaders").unwrap().unwrap();
        assert_eq!(
            to_db_time(state.last_refresh_at),
            to_db_time(second)
        );
        assert_eq!(storage.list_refresh_states().unwrap().len(), 1);
        assert!(storage.load_refresh_ids("other").unwrap().is_empty());
    }

    #[test]
    fn test_cache_entry_upsert_and_touch() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let fetched_at = Utc::now() - Duration::days(2);
        let entry = CacheEntry {
            url: "https://example.com/a".to_string(),
            etag: Some("\"v1\"".to_string()),
            last_modified: None,
            body_hash: "h1".to_string(),
            fetched_at,
        };
        storage.put_cache_entry(&entry).unwrap();

        let later = Utc::now();
        storage
            .touch_cache_entry("https://example.com/a", later)
            .unwrap();

        let stored = storage
            .get_cache_entry("https://example.com/a")
            .unwrap()
            .unwrap();
        assert_eq!(stored.etag.as_deref(), Some("\"v1\""));
        assert_eq!(stored.body_hash, "h1");
        assert_eq!(to_db_time(stored.fetched_at), to_db_time(later));
    }

    #[test]
    fn test_file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.db");
        {
            let mut storage = SqliteStorage::new(&path).unwrap();
            storage
                .append_log_entry(&log_entry("r1", "h1", Utc::now()))
                .unwrap();
        }
        let storage = SqliteStorage::new(&path).unwrap();
        assert_eq!(storage.count_log_entries().unwrap(), 1);
    }
}
