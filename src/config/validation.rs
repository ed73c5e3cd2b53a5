use crate::config::types::{
    Config, DiscoveryConfig, EngineConfig, OutputConfig, RateLimitConfig, SessionConfig,
    UserAgentConfig,
};
use crate::ConfigError;
use regex::Regex;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_user_agent_config(&config.user_agent)?;
    if let Some(session) = &config.session {
        validate_session_config(session)?;
    }
    validate_discovery_config(&config.discovery, config.engine.reuse_ids.is_some())?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 32 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 32, got {}",
            config.workers
        )));
    }

    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }

    if config.request_timeout_secs < 5 || config.request_timeout_secs > 120 {
        return Err(ConfigError::Validation(format!(
            "request_timeout_secs must be between 5 and 120, got {}",
            config.request_timeout_secs
        )));
    }

    for (name, path) in [
        ("reuse_ids", &config.reuse_ids),
        ("export_ids", &config.export_ids),
    ] {
        if matches!(path, Some(p) if p.trim().is_empty()) {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.min_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "min_delay_ms ({}) must not exceed max_delay_ms ({})",
            config.min_delay_ms, config.max_delay_ms
        )));
    }

    if config.max_delay_ms > config.max_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "max_delay_ms ({}) must not exceed max_backoff_ms ({})",
            config.max_delay_ms, config.max_backoff_ms
        )));
    }

    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    if config.cooldown_secs < 1 {
        return Err(ConfigError::Validation(
            "cooldown_secs must be >= 1".to_string(),
        ));
    }

    if config.max_retry_after_secs < 1 {
        return Err(ConfigError::Validation(
            "max_retry_after_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.agents.is_empty() {
        return Err(ConfigError::Validation(
            "at least one user agent is required".to_string(),
        ));
    }

    for agent in &config.agents {
        if agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "user agents cannot be empty".to_string(),
            ));
        }
        if agent.chars().any(|c| c.is_control()) {
            return Err(ConfigError::Validation(format!(
                "user agent '{}' contains control characters",
                agent.escape_debug()
            )));
        }
    }

    Ok(())
}

fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.cookie_file.trim().is_empty() {
        return Err(ConfigError::Validation(
            "cookie_file cannot be empty".to_string(),
        ));
    }

    validate_selector(&config.login_form_selector)?;
    if let Some(selector) = &config.auth_selector {
        validate_selector(selector)?;
    }

    if config.auto_login {
        let login_url = config.login_url.as_deref().ok_or_else(|| {
            ConfigError::Validation("auto_login requires login_url".to_string())
        })?;
        Url::parse(login_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid login_url: {}", e)))?;

        if config.username.is_none() || config.password.is_none() {
            return Err(ConfigError::Validation(
                "auto_login requires username and password".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_discovery_config(config: &DiscoveryConfig, reuse_ids: bool) -> Result<(), ConfigError> {
    if config.key.trim().is_empty() {
        return Err(ConfigError::Validation(
            "discovery key cannot be empty".to_string(),
        ));
    }

    validate_template(&config.url_template, "url_template")?;

    if config.sub_pages < 1 {
        return Err(ConfigError::Validation(
            "sub_pages must be >= 1".to_string(),
        ));
    }
    if config.sub_pages > 1 && !config.url_template.contains("{sub}") {
        return Err(ConfigError::Validation(
            "url_template must contain {sub} when sub_pages > 1".to_string(),
        ));
    }

    let id_pattern = Regex::new(&config.id_pattern)
        .map_err(|e| ConfigError::InvalidPattern(format!("id_pattern: {}", e)))?;
    if id_pattern.captures_len() < 2 {
        return Err(ConfigError::InvalidPattern(
            "id_pattern must contain a capture group for the identifier".to_string(),
        ));
    }
    Regex::new(&config.value_pattern)
        .map_err(|e| ConfigError::InvalidPattern(format!("value_pattern: {}", e)))?;

    validate_selector(&config.next_selector)?;

    if let Some(listing) = &config.listing_url {
        Url::parse(listing)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid listing_url: {}", e)))?;
    }

    if let Some(probe) = &config.probe_template {
        validate_template(probe, "probe_template")?;
        if !config.probe_partitions.is_empty() && !probe.contains("{partition}") {
            return Err(ConfigError::Validation(
                "probe_template must contain {partition} when probe_partitions is set"
                    .to_string(),
            ));
        }
        if !config.probe_partitions.is_empty() && !config.url_template.contains("{partition}") {
            return Err(ConfigError::Validation(
                "url_template must contain {partition} when probe_partitions is set".to_string(),
            ));
        }
        if config.probe_miss_limit < 1 {
            return Err(ConfigError::Validation(
                "probe_miss_limit must be >= 1".to_string(),
            ));
        }
        if config.probe_start > config.probe_max {
            return Err(ConfigError::Validation(format!(
                "probe_start ({}) must not exceed probe_max ({})",
                config.probe_start, config.probe_max
            )));
        }
    }

    if config.max_visited < 1 {
        return Err(ConfigError::Validation(
            "max_visited must be >= 1".to_string(),
        ));
    }

    validate_id_layout(config)?;

    let has_tier = config.listing_url.is_some()
        || config.seed_id.is_some()
        || config.probe_template.is_some();
    if !has_tier && !reuse_ids {
        return Err(ConfigError::Validation(
            "discovery needs a listing_url, seed_id or probe_template (or engine.reuse_ids)"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validates the packed-identifier layout used for adjacent inference
fn validate_id_layout(config: &DiscoveryConfig) -> Result<(), ConfigError> {
    if config.id_layout.iter().any(|w| *w == 0 || *w > 18) {
        return Err(ConfigError::Validation(
            "id_layout widths must be between 1 and 18".to_string(),
        ));
    }

    for (name, bounds) in [
        ("id_field_min", &config.id_field_min),
        ("id_field_max", &config.id_field_max),
    ] {
        if !bounds.is_empty() && bounds.len() != config.id_layout.len() {
            return Err(ConfigError::Validation(format!(
                "{} must have one entry per id_layout field",
                name
            )));
        }
    }

    for (i, min) in config.id_field_min.iter().enumerate() {
        if let Some(max) = config.id_field_max.get(i) {
            if min > max {
                return Err(ConfigError::Validation(format!(
                    "id field {} has min {} greater than max {}",
                    i, min, max
                )));
            }
        }
    }

    Ok(())
}

fn validate_template(template: &str, name: &str) -> Result<(), ConfigError> {
    if !template.contains("{id}") {
        return Err(ConfigError::Validation(format!(
            "{} must contain an {{id}} placeholder",
            name
        )));
    }

    let sample = template
        .replace("{id}", "0")
        .replace("{sub}", "0")
        .replace("{partition}", "0");
    Url::parse(&sample)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", name, e)))?;

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern(format!("selector '{}': {:?}", selector, e)))
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.content_dir.is_empty() {
        return Err(ConfigError::Validation(
            "content_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}
