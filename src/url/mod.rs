//! URL handling module for Delta-Harvest
//!
//! This module provides per-host keys for rate limiting, link resolution,
//! and the `{id}` / `{sub}` / `{partition}` templates that turn identifiers into targets.

mod host;
mod template;

pub use host::{host_key, resolve_link, robots_url};
pub use template::{probe_id, split_probe_id, UrlTemplate};
