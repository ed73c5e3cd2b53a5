//! Link scanning: identifiers embedded in a listing page

use crate::{ConfigError, Result};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;

/// Extracts identifiers from select options, anchor hrefs and data attributes
#[derive(Debug, Clone)]
pub struct LinkScanner {
    id_pattern: Regex,
    value_pattern: Regex,
}

impl LinkScanner {
    /// `id_pattern` is applied to hrefs (capture group 1 is the ID);
    /// `value_pattern` filters option values and `data-id` attributes
    pub fn new(id_pattern: &str, value_pattern: &str) -> Result<Self> {
        let id_pattern = Regex::new(id_pattern)
            .map_err(|e| ConfigError::InvalidPattern(format!("id_pattern: {}", e)))?;
        let value_pattern = Regex::new(value_pattern)
            .map_err(|e| ConfigError::InvalidPattern(format!("value_pattern: {}", e)))?;

        Ok(Self {
            id_pattern,
            value_pattern,
        })
    }

    /// Pulls an ID out of one href
    pub fn id_from_href(&self, href: &str) -> Option<String> {
        self.id_pattern
            .captures(href)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// All identifiers on the page, in document order, without duplicates
    pub fn scan(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        let options = attribute_values(&document, "option[value]", "value")
            .filter(|value| self.value_pattern.is_match(value));
        let anchors = attribute_values(&document, "a[href]", "href")
            .filter_map(|href| self.id_from_href(&href));
        let data_ids = attribute_values(&document, "[data-id]", "data-id")
            .filter(|value| self.value_pattern.is_match(value));

        for id in options.chain(anchors).chain(data_ids) {
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }

        ids
    }
}

fn attribute_values<'a>(
    document: &'a Html,
    selector: &str,
    attribute: &'a str,
) -> impl Iterator<Item = String> + 'a {
    let selector = Selector::parse(selector).ok();
    selector
        .into_iter()
        .flat_map(move |selector| {
            document
                .select(&selector)
                .filter_map(|element| element.value().attr(attribute))
                .map(|value| value.trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|value| !value.is_empty())
}
