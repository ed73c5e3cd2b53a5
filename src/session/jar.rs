//! Cookie-jar persistence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Cookies and the time they were last obtained by logging in
///
/// Stored as TOML:
///
/// ```toml
/// authenticated-at = "2024-05-01T10:00:00Z"
///
/// [cookies]
/// session = "abc123"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
}

impl SessionState {
    /// Reads the jar at `path`
    ///
    /// A missing file is an empty session. An unreadable jar is discarded
    /// with a warning so a corrupt file cannot block a run.
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e),
        };

        match toml::from_str(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!("Ignoring unreadable cookie jar {}: {}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    /// Rewrites the jar atomically
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let content = toml::to_string(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, path)
    }

    /// `Cookie` header value, if there are any cookies
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Applies `Set-Cookie` header values; returns how many changed the jar
    ///
    /// Attributes are ignored except that an empty value or `Max-Age=0`
    /// deletes the cookie.
    pub fn absorb_set_cookies(&mut self, set_cookies: &[String]) -> usize {
        let mut changed = 0;

        for header in set_cookies {
            let mut parts = header.split(';');
            let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
                continue;
            };
            let name = name.trim();
            let value = value.trim().trim_matches('"');
            if name.is_empty() {
                continue;
            }

            let expired = parts.any(|attr| {
                attr.split_once('=').is_some_and(|(key, val)| {
                    key.trim().eq_ignore_ascii_case("max-age") && val.trim() == "0"
                })
            });

            if expired || value.is_empty() {
                if self.cookies.remove(name).is_some() {
                    changed += 1;
                }
            } else if self.cookies.get(name).map(String::as_str) != Some(value) {
                self.cookies.insert(name.to_string(), value.to_string());
                changed += 1;
            }
        }

        changed
    }
}
