use crate::refresh::RefreshPolicy;
use serde::Deserialize;

/// Main configuration structure for Delta-Harvest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub engine: EngineConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub session: Option<SessionConfig>,
    pub discovery: DiscoveryConfig,
    pub output: OutputConfig,
}

/// Run-level behavior of the collection engine
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Worker-pool concurrency
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Skip downstream processing when the normalized content hash is unchanged
    #[serde(default = "default_true")]
    pub only_new: bool,

    /// How often the expensive discovery pass is rerun
    #[serde(default)]
    pub leaders_refresh: RefreshPolicy,

    /// Persisted identifier set; when present discovery is bypassed entirely
    #[serde(default)]
    pub reuse_ids: Option<String>,

    /// Where a freshly discovered identifier set is written for later reuse
    #[serde(default)]
    pub export_ids: Option<String>,

    /// TTL of conditional-cache entries, in days
    #[serde(default = "default_cache_days")]
    pub cache_days: u32,

    /// Attempt ceiling for transient failures on a single target
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Check robots.txt before fetching and honor its Crawl-delay
    #[serde(default = "default_true")]
    pub respect_robots: bool,
}

/// Pacing and circuit-breaker tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitConfig {
    /// Lower bound of the randomized delay between requests to one host (milliseconds)
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,

    /// Upper bound of the randomized delay (milliseconds)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Cap on the failure-widened delay and on 429/503 exponential backoff (milliseconds)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open breaker rejects requests (seconds)
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Ceiling applied to server-supplied Retry-After values (seconds)
    #[serde(default = "default_max_retry_after")]
    pub max_retry_after_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            max_backoff_ms: default_max_backoff(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
            max_retry_after_secs: default_max_retry_after(),
        }
    }
}

/// Client identities rotated through when a host starts refusing us
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    pub agents: Vec<String>,
}

/// Cookie persistence and optional form login
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Cookie-jar file, read at startup and rewritten after re-login
    pub cookie_file: String,

    #[serde(default)]
    pub auto_login: bool,

    #[serde(default)]
    pub login_url: Option<String>,

    #[serde(default = "default_username_field")]
    pub username_field: String,

    #[serde(default = "default_password_field")]
    pub password_field: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// CSS selector whose presence means the page was served logged out
    #[serde(default = "default_login_form_selector")]
    pub login_form_selector: String,

    /// CSS selector that only appears for an authenticated session
    #[serde(default)]
    pub auth_selector: Option<String>,
}

/// Target discovery settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscoveryConfig {
    /// Name of the refresh-policy row guarding this identifier set
    #[serde(default = "default_discovery_key")]
    pub key: String,

    /// Listing page scanned for embedded identifiers
    #[serde(default)]
    pub listing_url: Option<String>,

    /// Regex applied to anchor hrefs; capture group 1 is the identifier
    #[serde(default = "default_id_pattern")]
    pub id_pattern: String,

    /// Regex a select-option value or data-id attribute must match
    #[serde(default = "default_value_pattern")]
    pub value_pattern: String,

    /// Per-target URL, with {id} and optionally {sub}
    pub url_template: String,

    /// Number of sub-pages fetched per identifier
    #[serde(default = "default_sub_pages")]
    pub sub_pages: u32,

    /// Known identifier adjacent navigation starts from
    #[serde(default)]
    pub seed_id: Option<String>,

    /// CSS selector for an explicit "next" link
    #[serde(default = "default_next_selector")]
    pub next_selector: String,

    /// Widths of the trailing numeric fields packed into an identifier
    #[serde(default)]
    pub id_layout: Vec<usize>,

    /// Inclusive minimum per packed field (defaults to 0)
    #[serde(default)]
    pub id_field_min: Vec<u64>,

    /// Inclusive maximum per packed field (defaults to the width's maximum)
    #[serde(default)]
    pub id_field_max: Vec<u64>,

    /// Hard ceiling on pages visited by adjacent navigation
    #[serde(default = "default_max_visited")]
    pub max_visited: u32,

    /// Existence probe URL, with {id} and optionally {partition}
    #[serde(default)]
    pub probe_template: Option<String>,

    #[serde(default)]
    pub probe_partitions: Vec<String>,

    #[serde(default = "default_probe_start")]
    pub probe_start: u64,

    /// Consecutive misses that end a partition
    #[serde(default = "default_probe_miss_limit")]
    pub probe_miss_limit: u32,

    #[serde(default = "default_probe_max")]
    pub probe_max: u64,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite state database
    pub database_path: String,

    /// Directory accepted content is written to by the CLI sink
    #[serde(default = "default_content_dir")]
    pub content_dir: String,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> u32 {
    1
}

fn default_cache_days() -> u32 {
    7
}

fn default_max_attempts() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    30
}

fn default_min_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    3000
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_failure_threshold() -> u32 {
    4
}

fn default_cooldown() -> u64 {
    120
}

fn default_max_retry_after() -> u64 {
    300
}

fn default_username_field() -> String {
    "username".to_string()
}

fn default_password_field() -> String {
    "password".to_string()
}

fn default_login_form_selector() -> String {
    "form input[type='password']".to_string()
}

fn default_discovery_key() -> String {
    "leaders".to_string()
}

fn default_id_pattern() -> String {
    r"[?&/]id[=/]([A-Za-z0-9_-]+)".to_string()
}

fn default_value_pattern() -> String {
    r"^[A-Za-z0-9_-]+$".to_string()
}

fn default_sub_pages() -> u32 {
    1
}

fn default_next_selector() -> String {
    "a[rel='next']".to_string()
}

fn default_max_visited() -> u32 {
    500
}

fn default_probe_start() -> u64 {
    1
}

fn default_probe_miss_limit() -> u32 {
    20
}

fn default_probe_max() -> u64 {
    100_000
}

fn default_content_dir() -> String {
    "content".to_string()
}
