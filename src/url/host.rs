use crate::{UrlError, UrlResult};
use url::Url;

/// Returns the key under which a URL's host is rate limited
///
/// The host is lowercased; a non-default port is kept so two services on
/// one machine are paced independently.
///
/// # Examples
///
/// ```
/// use delta_harvest::url::host_key;
///
/// assert_eq!(host_key("https://Example.COM/a").unwrap(), "example.com");
/// assert_eq!(host_key("http://127.0.0.1:8080/a").unwrap(), "127.0.0.1:8080");
/// ```
pub fn host_key(url: &str) -> UrlResult<String> {
    let parsed = Url::parse(url).map_err(|e| UrlError::Parse(format!("{}: {}", url, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| UrlError::MissingHost(url.to_string()))?
        .to_lowercase();

    Ok(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Resolves `href` against the page it was found on
pub fn resolve_link(base: &str, href: &str) -> UrlResult<String> {
    let base = Url::parse(base).map_err(|e| UrlError::Parse(format!("{}: {}", base, e)))?;
    let mut resolved = base
        .join(href.trim())
        .map_err(|e| UrlError::Parse(format!("{}: {}", href, e)))?;
    resolved.set_fragment(None);
    Ok(resolved.to_string())
}

/// robots.txt location for the host serving `url`
pub fn robots_url(url: &str) -> UrlResult<String> {
    let mut parsed = Url::parse(url).map_err(|e| UrlError::Parse(format!("{}: {}", url, e)))?;
    if parsed.host_str().is_none() {
        return Err(UrlError::MissingHost(url.to_string()));
    }
    parsed.set_path("/robots.txt");
    parsed.set_query(None);
    parsed.set_fragment(None);
    Ok(parsed.to_string())
}
