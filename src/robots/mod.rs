//! Robots.txt handling module
//!
//! robots.txt is fetched once per host per process and kept in a
//! [`RobotsCache`]. A disallowed target is treated as a hostile outcome.

mod rules;

pub use rules::RobotsRules;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Per-host robots.txt rules for the lifetime of the process
#[derive(Default)]
pub struct RobotsCache {
    rules: Mutex<HashMap<String, Arc<RobotsRules>>>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, host: &str) -> Option<Arc<RobotsRules>> {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
    }

    /// Stores rules for `host`; the first insert wins
    pub fn insert(&self, host: &str, rules: RobotsRules) -> Arc<RobotsRules> {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(rules))
            .clone()
    }
}
