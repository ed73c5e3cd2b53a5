//! Database schema definitions
//!
//! All persistent harvest state lives in one SQLite file so every mutation
//! funnels through the same connection.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    skipped_unchanged INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0
);

-- Append-only record of processed content hashes
CREATE TABLE IF NOT EXISTS scrape_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_id TEXT NOT NULL,
    url TEXT NOT NULL,
    sub_index INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    scraped_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scrape_log_key ON scrape_log(resource_id, url, sub_index, id);
CREATE INDEX IF NOT EXISTS idx_scrape_log_scraped_at ON scrape_log(scraped_at);

CREATE TRIGGER IF NOT EXISTS scrape_log_no_update
BEFORE UPDATE ON scrape_log
BEGIN
    SELECT RAISE(ABORT, 'scrape_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS scrape_log_no_delete
BEFORE DELETE ON scrape_log
BEGIN
    SELECT RAISE(ABORT, 'scrape_log is append-only');
END;

-- One row per named discovery aggregate
CREATE TABLE IF NOT EXISTS refresh_policy (
    key TEXT PRIMARY KEY,
    last_refresh_at TEXT NOT NULL
);

-- The ID set guarded by each refresh_policy row
CREATE TABLE IF NOT EXISTS refresh_ids (
    key TEXT NOT NULL,
    position INTEGER NOT NULL,
    id TEXT NOT NULL,
    PRIMARY KEY (key, position)
);

-- Conditional GET validators
CREATE TABLE IF NOT EXISTS http_cache (
    url TEXT PRIMARY KEY,
    etag TEXT,
    last_modified TEXT,
    body_hash TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// Safe to call on an existing database.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
