//! robots.txt rules for one host

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// Parsed robots.txt data
///
/// Matching is delegated to the robotstxt crate; Crawl-delay, which that
/// crate does not expose, is read from the raw content.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    /// Raw content; empty means allow all
    content: String,
}

impl RobotsRules {
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// Rules used when robots.txt is absent or unreadable
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Interprets a robots.txt response
    ///
    /// Only a 2xx body is honored; anything else allows everything.
    pub fn from_response(status: u16, body: &str) -> Self {
        if (200..300).contains(&status) {
            Self::from_content(body)
        } else {
            Self::allow_all()
        }
    }

    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, product_token(user_agent), url)
    }

    /// Crawl-delay for `user_agent`, falling back to the `*` group
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        let agent = product_token(user_agent).to_lowercase();
        let mut group_agents: Vec<String> = Vec::new();
        let mut in_rules = false;
        let mut specific = None;
        let mut wildcard = None;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_lowercase().as_str() {
                "user-agent" => {
                    if in_rules {
                        group_agents.clear();
                        in_rules = false;
                    }
                    group_agents.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    in_rules = true;
                    let Ok(seconds) = value.parse::<f64>() else {
                        continue;
                    };
                    if seconds < 0.0 || !seconds.is_finite() {
                        continue;
                    }
                    let delay = Duration::from_secs_f64(seconds);
                    if group_agents.iter().any(|ua| ua == "*") {
                        wildcard = Some(delay);
                    }
                    if group_agents.iter().any(|ua| ua != "*" && agent.contains(ua.as_str())) {
                        specific = Some(delay);
                    }
                }
                _ => in_rules = true,
            }
        }

        specific.or(wildcard)
    }
}

/// "MyBot/1.0 (+https://...)" -> "MyBot"
fn product_token(user_agent: &str) -> &str {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or(user_agent)
}
