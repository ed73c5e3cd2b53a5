//! Target discovery
//!
//! Identifiers are enumerated by the first tier that yields any:
//! 1. link scanning of a listing page
//! 2. adjacent navigation from a seed identifier
//! 3. bounded brute-force probing
//!
//! Discovery is gated by the refresh policy (see [`crate::refresh`]), so it
//! does not run on every invocation.

mod adjacent;
mod links;
mod probe;

pub use adjacent::{AdjacentWalker, FieldLayout, IdInference};
pub use links::LinkScanner;
pub use probe::Prober;

use crate::config::DiscoveryConfig;
use crate::state::{FetchTarget, TargetKind};
use crate::url::UrlTemplate;
use crate::{HarvestError, Result};
use async_trait::async_trait;

/// Page access used by discovery
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches a page body; `Ok(None)` when the page does not exist
    async fn fetch_page(&self, url: &str) -> Result<Option<String>>;
}

/// Fetches a page for discovery
///
/// Only a missing page (404/410) is `Ok(None)`. Every other failure abandons
/// the pass, so a refresh never commits an identifier set cut short by a
/// throttled host or an open breaker.
pub(crate) async fn fetch_discovery_page(
    source: &dyn PageSource,
    url: &str,
) -> Result<Option<String>> {
    source.fetch_page(url).await.map_err(|e| {
        if e.is_fatal_for_run() {
            e
        } else {
            HarvestError::Discovery(format!("could not fetch {}: {}", url, e))
        }
    })
}

/// Identifiers found by one discovery pass and the tier that found them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredIds {
    pub ids: Vec<String>,
    pub kind: TargetKind,
}

/// Two-tier discovery plus brute-force fallback
pub struct Discovery {
    scanner: LinkScanner,
    listing_url: Option<String>,
    seed_id: Option<String>,
    walker: AdjacentWalker,
    prober: Option<Prober>,
    template: UrlTemplate,
    sub_pages: u32,
}

impl Discovery {
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        let scanner = LinkScanner::new(&config.id_pattern, &config.value_pattern)?;
        let template = UrlTemplate::parse(&config.url_template)?;

        let inference: Option<Box<dyn IdInference>> = if config.id_layout.is_empty() {
            None
        } else {
            Some(Box::new(FieldLayout::new(
                config.id_layout.clone(),
                config.id_field_min.clone(),
                config.id_field_max.clone(),
            )))
        };

        let walker = AdjacentWalker::new(
            scanner.clone(),
            template.clone(),
            &config.next_selector,
            inference,
            config.max_visited,
        );

        let prober = match &config.probe_template {
            Some(probe) => Some(Prober::new(
                UrlTemplate::parse(probe)?,
                config.probe_partitions.clone(),
                config.probe_start,
                config.probe_miss_limit,
                config.probe_max,
            )),
            None => None,
        };

        Ok(Self {
            scanner,
            listing_url: config.listing_url.clone(),
            seed_id: config.seed_id.clone(),
            walker,
            prober,
            template,
            sub_pages: config.sub_pages.max(1),
        })
    }

    /// Runs the tiers in order and returns the first non-empty result
    ///
    /// An empty result means every configured tier came up empty.
    pub async fn discover(&self, source: &dyn PageSource) -> Result<DiscoveredIds> {
        if let Some(listing_url) = &self.listing_url {
            let ids = self.scan_listing(listing_url, source).await?;
            if !ids.is_empty() {
                tracing::info!("Link scan of {} found {} identifiers", listing_url, ids.len());
                return Ok(DiscoveredIds {
                    ids,
                    kind: TargetKind::Listed,
                });
            }
            tracing::info!("Link scan of {} found nothing, falling back", listing_url);
        }

        if let Some(seed) = &self.seed_id {
            let ids = self.walker.walk(seed, source).await?;
            if !ids.is_empty() {
                return Ok(DiscoveredIds {
                    ids,
                    kind: TargetKind::Sequenced,
                });
            }
        }

        if let Some(prober) = &self.prober {
            let ids = prober.probe_all(source).await?;
            if !ids.is_empty() {
                return Ok(DiscoveredIds {
                    ids,
                    kind: TargetKind::Probed,
                });
            }
        }

        tracing::warn!("No discovery tier produced identifiers");
        Ok(DiscoveredIds {
            ids: Vec::new(),
            kind: TargetKind::Listed,
        })
    }

    async fn scan_listing(&self, listing_url: &str, source: &dyn PageSource) -> Result<Vec<String>> {
        match fetch_discovery_page(source, listing_url).await? {
            Some(page) => Ok(self.scanner.scan(&page)),
            None => {
                tracing::warn!("Listing page {} does not exist", listing_url);
                Ok(Vec::new())
            }
        }
    }

    /// Expands identifiers into fetch targets, one per sub-page
    pub fn targets(&self, ids: &[String], kind: TargetKind) -> Vec<FetchTarget> {
        ids.iter()
            .flat_map(|id| {
                (0..self.sub_pages).map(move |sub| {
                    FetchTarget::new(id.clone(), self.template.expand(id, sub), sub, kind)
                })
            })
            .collect()
    }
}
