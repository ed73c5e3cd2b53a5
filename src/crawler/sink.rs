//! Downstream content handling
//!
//! The engine never interprets page content itself. Whatever parses and
//! stores it sits behind [`ContentSink`].

use crate::state::FetchTarget;
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// What the sink did with a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    /// Content was stored; the scrape log may record it
    Stored,
    /// The expected data was not on the page; not a fetch failure
    ParseMiss(String),
}

/// Parses and stores changed content
#[async_trait]
pub trait ContentSink: Send + Sync {
    async fn accept(&self, target: &FetchTarget, content: &str) -> Result<SinkOutcome>;
}

/// Writes each page to `<root>/<resource_id>/<sub_index>.html`
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File a target's content is written to
    pub fn path_for(&self, target: &FetchTarget) -> PathBuf {
        self.root
            .join(safe_component(&target.resource_id))
            .join(format!("{}.html", target.sub_index))
    }
}

/// Keeps identifiers from escaping the content directory
fn safe_component(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl ContentSink for DirectorySink {
    async fn accept(&self, target: &FetchTarget, content: &str) -> Result<SinkOutcome> {
        let path = self.path_for(target);
        let sink_error = |e: std::io::Error| HarvestError::Sink {
            resource_id: target.resource_id.clone(),
            message: format!("{}: {}", path.display(), e),
        };

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(sink_error)?;
        }
        tokio::fs::write(&path, content).await.map_err(sink_error)?;

        tracing::debug!("Stored {} at {}", target, path.display());
        Ok(SinkOutcome::Stored)
    }
}
