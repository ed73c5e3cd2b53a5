//! Identifier sets guarded by a refresh policy
//!
//! An ID set comes from one of three places: a side file named by
//! `reuse-ids`, a fresh discovery pass, or the set committed to the store by
//! the last refresh.

use crate::refresh::{needs_refresh, RefreshPolicy};
use crate::storage::StateStore;
use crate::{ConfigError, ConfigResult, HarvestError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Side-file options from `[engine]`
#[derive(Debug, Clone, Default)]
pub struct IdSetOptions {
    /// Use this file verbatim and skip discovery
    pub reuse_ids: Option<PathBuf>,
    /// Rewrite this file after every successful refresh
    pub export_ids: Option<PathBuf>,
}

/// Where a resolved ID set came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdSource {
    Reused(PathBuf),
    Refreshed,
    Stored { last_refresh_at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct ResolvedIds {
    pub ids: Vec<String>,
    pub source: IdSource,
}

/// Reads an ID file: one ID per line, blank lines and `#` comments ignored
pub fn read_id_file(path: &Path) -> ConfigResult<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IdFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let ids = dedupe(
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string),
    );

    if ids.is_empty() {
        return Err(ConfigError::IdFile {
            path: path.display().to_string(),
            message: "contains no identifiers".to_string(),
        });
    }

    Ok(ids)
}

/// Writes an ID file atomically (temp file, then rename)
pub fn write_id_file(path: &Path, key: &str, ids: &[String]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ids".to_string());
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    {
        let mut file = fs::File::create(&tmp_path)?;
        writeln!(file, "# {} identifiers, refreshed {}", key, Utc::now().to_rfc3339())?;
        for id in ids {
            writeln!(file, "{}", id)?;
        }
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)
}

fn dedupe(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Produces the ID set for `key`, running `discover` only when needed
///
/// A refresh commits the new set and `last_refresh_at` as one transaction.
/// When no refresh is due and no file is reused, the stored set is used; an
/// absent set is [`HarvestError::MissingIdSet`], never an empty result.
///
/// # Arguments
///
/// * `store` - State store holding the refresh-policy rows and committed sets
/// * `key` - Name of the discovery aggregate, e.g. `leaders`
/// * `policy` - How often `key` must be re-enumerated
/// * `options` - Optional `reuse-ids` / `export-ids` side files
/// * `now` - Reference time for the policy decision and the commit
/// * `discover` - Runs the discovery pass; only called when a refresh is due
///
/// # Returns
///
/// * `Ok(ResolvedIds)` - The identifiers and where they came from
/// * `Err(HarvestError)` - The side file is unusable, no stored set exists, or
///   discovery failed or found nothing. Nothing is committed in these cases.
///
/// # Example
///
/// ```no_run
/// use chrono::Utc;
/// use delta_harvest::refresh::{resolve_ids, IdSetOptions, RefreshPolicy};
/// use delta_harvest::StateStore;
///
/// # async fn example() -> delta_harvest::Result<()> {
/// let store = StateStore::open(std::path::Path::new("state.db"))?;
/// let resolved = resolve_ids(
///     &store,
///     "leaders",
///     RefreshPolicy::Weekly,
///     &IdSetOptions::default(),
///     Utc::now(),
///     || async { Ok(vec!["401".to_string(), "402".to_string()]) },
/// )
/// .await?;
/// println!("{} ids from {:?}", resolved.ids.len(), resolved.source);
/// # Ok(())
/// # }
/// ```
pub async fn resolve_ids<F, Fut>(
    store: &StateStore,
    key: &str,
    policy: RefreshPolicy,
    options: &IdSetOptions,
    now: DateTime<Utc>,
    discover: F,
) -> Result<ResolvedIds>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<String>>>,
{
    if let Some(path) = &options.reuse_ids {
        let ids = read_id_file(path)?;
        tracing::info!(
            "Reusing {} identifiers for '{}' from {}",
            ids.len(),
            key,
            path.display()
        );
        return Ok(ResolvedIds {
            ids,
            source: IdSource::Reused(path.clone()),
        });
    }

    let last_refresh_at = store.refresh_state(key)?.map(|state| state.last_refresh_at);

    if !needs_refresh(policy, last_refresh_at, now) {
        let ids = store.refresh_ids(key)?;
        let last_refresh_at = match last_refresh_at {
            Some(at) if !ids.is_empty() => at,
            _ => {
                return Err(HarvestError::MissingIdSet {
                    key: key.to_string(),
                })
            }
        };
        tracing::info!(
            "Refresh of '{}' not due ({} policy), using {} stored identifiers",
            key,
            policy,
            ids.len()
        );
        return Ok(ResolvedIds {
            ids,
            source: IdSource::Stored { last_refresh_at },
        });
    }

    tracing::info!("Refreshing identifier set '{}' ({} policy)", key, policy);
    let ids = dedupe(discover().await?);
    if ids.is_empty() {
        return Err(HarvestError::Discovery(format!(
            "refresh of '{}' found no identifiers",
            key
        )));
    }

    store.commit_refresh(key, &ids, now)?;
    tracing::info!("Committed {} identifiers for '{}'", ids.len(), key);

    if let Some(path) = &options.export_ids {
        if let Err(e) = write_id_file(path, key, &ids) {
            tracing::warn!("Failed to export identifiers to {}: {}", path.display(), e);
        }
    }

    Ok(ResolvedIds {
        ids,
        source: IdSource::Refreshed,
    })
}
