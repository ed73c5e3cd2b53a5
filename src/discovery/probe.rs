//! Bounded brute-force enumeration

use crate::discovery::{fetch_discovery_page, PageSource};
use crate::url::{probe_id, UrlTemplate};
use crate::Result;

/// Sequential existence probe over numbered identifiers
///
/// A partition ends after `miss_limit` consecutive misses or at `max`,
/// whichever comes first.
pub struct Prober {
    template: UrlTemplate,
    partitions: Vec<String>,
    start: u64,
    miss_limit: u32,
    max: u64,
}

impl Prober {
    pub fn new(
        template: UrlTemplate,
        partitions: Vec<String>,
        start: u64,
        miss_limit: u32,
        max: u64,
    ) -> Self {
        Self {
            template,
            partitions,
            start,
            miss_limit,
            max,
        }
    }

    /// Probes every partition (or the single unpartitioned range)
    pub async fn probe_all(&self, source: &dyn PageSource) -> Result<Vec<String>> {
        if self.partitions.is_empty() {
            return self.probe_partition(source, None).await;
        }

        let mut found = Vec::new();
        for partition in &self.partitions {
            found.extend(self.probe_partition(source, Some(partition)).await?);
        }
        Ok(found)
    }

    /// Probes one partition
    ///
    /// Only a missing page counts as a miss. Any other fetch failure (an
    /// open breaker included) abandons the probe instead of burning through
    /// the miss limit without an answer.
    pub async fn probe_partition(
        &self,
        source: &dyn PageSource,
        partition: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut misses = 0;
        let mut n = self.start;

        while n <= self.max && misses < self.miss_limit {
            let url = self.template.expand_probe(partition, &n.to_string());

            match fetch_discovery_page(source, &url).await? {
                Some(_) => {
                    found.push(probe_id(partition, n));
                    misses = 0;
                }
                None => misses += 1,
            }
            n += 1;
        }

        tracing::info!(
            "Probe of partition {} found {} identifiers (stopped at {})",
            partition.unwrap_or("-"),
            found.len(),
            n.saturating_sub(1)
        );
        Ok(found)
    }
}
