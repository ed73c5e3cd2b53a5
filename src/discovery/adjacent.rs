//! Adjacent navigation: walk from a seed identifier to its successors
//!
//! Each step prefers an explicit "next" link on the current page. Without
//! one, the successor is inferred from the identifier's packed numeric
//! fields and confirmed by fetching it.

use crate::discovery::{fetch_discovery_page, LinkScanner, PageSource};
use crate::url::{resolve_link, UrlTemplate};
use crate::Result;
use scraper::{Html, Selector};
use std::collections::HashSet;

/// Proposes successor identifiers, most likely first
pub trait IdInference: Send + Sync {
    fn candidates(&self, current: &str) -> Vec<String>;
}

/// Identifiers ending in fixed-width numeric fields, e.g. `ABC` + `2024` + `07` + `1`
///
/// Successors are produced odometer-style: the last field is incremented
/// first; when a field cannot be incremented the one before it is, and
/// every later field resets to its minimum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    widths: Vec<usize>,
    mins: Vec<u64>,
    maxs: Vec<u64>,
}

impl FieldLayout {
    /// Missing bounds default to 0 and the largest value the width can hold
    pub fn new(widths: Vec<usize>, mins: Vec<u64>, maxs: Vec<u64>) -> Self {
        let mins = if mins.len() == widths.len() {
            mins
        } else {
            vec![0; widths.len()]
        };
        let maxs = if maxs.len() == widths.len() {
            maxs
        } else {
            widths
                .iter()
                .map(|w| 10u64.saturating_pow(*w as u32).saturating_sub(1))
                .collect()
        };

        Self { widths, mins, maxs }
    }

    fn split<'a>(&self, id: &'a str) -> Option<(&'a str, Vec<u64>)> {
        let total: usize = self.widths.iter().sum();
        if total == 0 || id.len() < total || !id.is_char_boundary(id.len() - total) {
            return None;
        }

        let (prefix, mut packed) = id.split_at(id.len() - total);
        let mut fields = Vec::with_capacity(self.widths.len());
        for width in &self.widths {
            let (field, rest) = packed.split_at(*width);
            if !field.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            fields.push(field.parse().ok()?);
            packed = rest;
        }

        Some((prefix, fields))
    }

    fn join(&self, prefix: &str, fields: &[u64]) -> String {
        let mut id = prefix.to_string();
        for (value, width) in fields.iter().zip(&self.widths) {
            id.push_str(&format!("{:0width$}", value, width = width));
        }
        id
    }
}

impl IdInference for FieldLayout {
    fn candidates(&self, current: &str) -> Vec<String> {
        let Some((prefix, fields)) = self.split(current) else {
            return Vec::new();
        };

        (0..fields.len())
            .rev()
            .filter(|level| fields[*level] < self.maxs[*level])
            .map(|level| {
                let mut next = fields.clone();
                next[level] += 1;
                for lower in level + 1..next.len() {
                    next[lower] = self.mins[lower];
                }
                self.join(prefix, &next)
            })
            .collect()
    }
}

/// Walks successors from a seed
pub struct AdjacentWalker {
    scanner: LinkScanner,
    template: UrlTemplate,
    next_selector: String,
    inference: Option<Box<dyn IdInference>>,
    max_visited: u32,
}

impl AdjacentWalker {
    pub fn new(
        scanner: LinkScanner,
        template: UrlTemplate,
        next_selector: &str,
        inference: Option<Box<dyn IdInference>>,
        max_visited: u32,
    ) -> Self {
        Self {
            scanner,
            template,
            next_selector: next_selector.to_string(),
            inference,
            max_visited,
        }
    }

    /// Identifier behind the page's "next" link, if any
    pub fn next_link_id(&self, html: &str, page_url: &str) -> Option<String> {
        let selector = Selector::parse(&self.next_selector).ok()?;
        let document = Html::parse_document(html);
        let href = document
            .select(&selector)
            .find_map(|element| element.value().attr("href"))?;
        let resolved = resolve_link(page_url, href).ok()?;
        self.scanner.id_from_href(&resolved)
    }

    /// Visits `seed` and its successors
    ///
    /// Stops when there is neither a next link nor a confirmed inferred
    /// successor, when the next identifier does not advance, or after
    /// `max_visited` page fetches. A missing page ends the chain; any other
    /// fetch failure fails the walk rather than returning a truncated chain.
    pub async fn walk(&self, seed: &str, source: &dyn PageSource) -> Result<Vec<String>> {
        let mut visited: u32 = 0;
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        let mut current = seed.to_string();
        let mut current_url = self.template.expand(&current, 0);
        visited += 1;
        let Some(mut page) = fetch_discovery_page(source, &current_url).await? else {
            tracing::warn!("Seed {} does not exist, nothing to walk", seed);
            return Ok(ids);
        };
        seen.insert(current.clone());
        ids.push(current.clone());

        loop {
            if visited >= self.max_visited {
                tracing::warn!(
                    "Adjacent navigation stopped at the {}-page ceiling (last id {})",
                    self.max_visited,
                    current
                );
                break;
            }

            let next = match self.next_link_id(&page, &current_url) {
                Some(next) => {
                    if seen.contains(&next) {
                        tracing::debug!("Next link from {} does not advance", current);
                        break;
                    }
                    visited += 1;
                    let url = self.template.expand(&next, 0);
                    fetch_discovery_page(source, &url).await?.map(|body| (next, url, body))
                }
                None => self.infer_next(&current, &seen, &mut visited, source).await?,
            };

            let Some((next, url, body)) = next else {
                tracing::debug!("No successor after {}", current);
                break;
            };

            seen.insert(next.clone());
            ids.push(next.clone());
            current = next;
            current_url = url;
            page = body;
        }

        tracing::info!(
            "Adjacent navigation from {} found {} identifiers in {} fetches",
            seed,
            ids.len(),
            visited
        );
        Ok(ids)
    }

    /// Tries inferred candidates in order until one exists
    async fn infer_next(
        &self,
        current: &str,
        seen: &HashSet<String>,
        visited: &mut u32,
        source: &dyn PageSource,
    ) -> Result<Option<(String, String, String)>> {
        let Some(inference) = &self.inference else {
            return Ok(None);
        };

        for candidate in inference.candidates(current) {
            if candidate == current || seen.contains(&candidate) {
                continue;
            }
            if *visited >= self.max_visited {
                return Ok(None);
            }

            *visited += 1;
            let url = self.template.expand(&candidate, 0);
            if let Some(body) = fetch_discovery_page(source, &url).await? {
                tracing::debug!("Inferred successor {} -> {}", current, candidate);
                return Ok(Some((candidate, url, body)));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned pages and records every request
    struct FixtureSource {
        pages: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    impl FixtureSource {
        fn new(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.to_string()))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageSource for FixtureSource {
        async fn fetch_page(&self, url: &str) -> Result<Option<String>> {
            self.requests.lock().unwrap().push(url.to_string());
            Ok(self.pages.get(url).cloned())
        }
    }

    fn walker(inference: Option<Box<dyn IdInference>>, max_visited: u32) -> AdjacentWalker {
        AdjacentWalker::new(
            LinkScanner::new(r"/g/([A-Za-z0-9]+)", r".+").unwrap(),
            UrlTemplate::parse("https://x.test/g/{id}").unwrap(),
            "a.next",
            inference,
            max_visited,
        )
    }

    #[test]
    fn test_odometer_candidates() {
        let layout = FieldLayout::new(vec![2, 1], vec![1, 0], vec![9, 1]);
        assert_eq!(layout.candidates("G030"), vec!["G031", "G040"]);
        assert_eq!(layout.candidates("G031"), vec!["G040"]);
        assert!(layout.candidates("G091").is_empty());
        assert!(layout.candidates("short").is_empty());
    }

    #[test]
    fn test_default_bounds() {
        let layout = FieldLayout::new(vec![2], vec![], vec![]);
        assert_eq!(layout.candidates("A98"), vec!["A99"]);
        assert!(layout.candidates("A99").is_empty());
    }

    #[tokio::test]
    async fn test_follows_next_links_until_absent() {
        let source = FixtureSource::new(&[
            ("https://x.test/g/a1", r#"<a class="next" href="/g/a2">next</a>"#),
            ("https://x.test/g/a2", r#"<a class="next" href="a3">next</a>"#),
            ("https://x.test/g/a3", "<p>the end</p>"),
        ]);

        let ids = walker(None, 100).walk("a1", &source).await.unwrap();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);
    }

    #[tokio::test]
    async fn test_cycle_does_not_loop() {
        let source = FixtureSource::new(&[
            ("https://x.test/g/a1", r#"<a class="next" href="/g/a2">next</a>"#),
            ("https://x.test/g/a2", r#"<a class="next" href="/g/a1">next</a>"#),
        ]);

        let ids = walker(None, 100).walk("a1", &source).await.unwrap();
        assert_eq!(ids, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_inference_when_no_next_link() {
        let source = FixtureSource::new(&[
            ("https://x.test/g/G030", "<p>one</p>"),
            ("https://x.test/g/G040", "<p>two</p>"),
        ]);
        let layout = FieldLayout::new(vec![2, 1], vec![1, 0], vec![4, 1]);

        let ids = walker(Some(Box::new(layout)), 100)
            .walk("G030", &source)
            .await
            .unwrap();

        assert_eq!(ids, vec!["G030", "G040"]);
        // G031 was tried and missed before G040
        let requests = source.requests.lock().unwrap();
        assert!(requests.contains(&"https://x.test/g/G031".to_string()));
    }

    #[tokio::test]
    async fn test_visited_ceiling() {
        let pages: Vec<(String, String)> = (0..50)
            .map(|n| {
                (
                    format!("https://x.test/g/p{}", n),
                    format!(r#"<a class="next" href="/g/p{}">next</a>"#, n + 1),
                )
            })
            .collect();
        let refs: Vec<(&str, &str)> = pages
            .iter()
            .map(|(u, b)| (u.as_str(), b.as_str()))
            .collect();
        let source = FixtureSource::new(&refs);

        let ids = walker(None, 5).walk("p0", &source).await.unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(source.requests.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_missing_seed() {
        let source = FixtureSource::new(&[]);
        let ids = walker(None, 5).walk("zz", &source).await.unwrap();
        assert!(ids.is_empty());
    }
}
