use std::fmt;

/// How a target entered the work queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// Identifier found by scanning a listing page
    Listed,
    /// Identifier reached by walking "next" links or inferred successors
    Sequenced,
    /// Identifier confirmed by a bounded existence probe
    Probed,
    /// Identifier read from a persisted identifier set
    Supplied,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listed => "listed",
            Self::Sequenced => "sequenced",
            Self::Probed => "probed",
            Self::Supplied => "supplied",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single resource page to fetch
///
/// Produced by discovery and consumed once per orchestrator pass. The
/// `(resource_id, url, sub_index)` triple is the scrape-log key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchTarget {
    pub resource_id: String,
    pub url: String,
    pub sub_index: u32,
    pub kind: TargetKind,
}

impl FetchTarget {
    pub fn new(
        resource_id: impl Into<String>,
        url: impl Into<String>,
        sub_index: u32,
        kind: TargetKind,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            url: url.into(),
            sub_index,
            kind,
        }
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} ({})", self.resource_id, self.sub_index, self.url)
    }
}
