use crate::{UrlError, UrlResult};
use url::form_urlencoded::byte_serialize;

/// A target URL with `{id}`, `{sub}` and `{partition}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
}

impl UrlTemplate {
    pub fn parse(raw: &str) -> UrlResult<Self> {
        if !raw.contains("{id}") {
            return Err(UrlError::MissingIdPlaceholder(raw.to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True if the template distinguishes sub-pages
    pub fn has_sub(&self) -> bool {
        self.raw.contains("{sub}")
    }

    /// True if the template carries a probe partition
    pub fn has_partition(&self) -> bool {
        self.raw.contains("{partition}")
    }

    /// Fills in the identifier and sub-page index
    ///
    /// With a `{partition}` placeholder the identifier is read as a probed
    /// `<partition>-<n>` pair (see [`probe_id`]) and both halves are filled in.
    pub fn expand(&self, id: &str, sub_index: u32) -> String {
        let (partition, id) = if self.has_partition() {
            split_probe_id(id)
        } else {
            (None, id)
        };
        self.fill(partition, id, sub_index)
    }

    /// Fills in a probe partition and sequence number
    pub fn expand_probe(&self, partition: Option<&str>, id: &str) -> String {
        self.fill(partition, id, 0)
    }

    fn fill(&self, partition: Option<&str>, id: &str, sub_index: u32) -> String {
        self.raw
            .replace("{partition}", &encode(partition.unwrap_or_default()))
            .replace("{id}", &encode(id))
            .replace("{sub}", &sub_index.to_string())
    }
}

/// Identifier recorded for a probe hit: `2023-17` when partitioned, `17` otherwise
pub fn probe_id(partition: Option<&str>, n: u64) -> String {
    match partition {
        Some(partition) => format!("{}-{}", partition, n),
        None => n.to_string(),
    }
}

/// Inverse of [`probe_id`]; the number follows the last `-`
pub fn split_probe_id(id: &str) -> (Option<&str>, &str) {
    match id.rsplit_once('-') {
        Some((partition, n))
            if !partition.is_empty() && !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (Some(partition), n)
        }
        _ => (None, id),
    }
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}
