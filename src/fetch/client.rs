//! HTTP transport implementation
//!
//! The engine only needs "fetch a URL, get bytes back"; [`HttpTransport`]
//! is that seam. [`ReqwestTransport`] is the production implementation.

use crate::fetch::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{
    COOKIE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RETRY_AFTER, SET_COOKIE,
    USER_AGENT,
};
use reqwest::{redirect::Policy, Client, Response};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Conditional-GET validators from a previous response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A single GET request as the engine wants it sent
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub user_agent: String,
    pub validators: Validators,
    pub cookie: Option<String>,
}

/// Status, the headers the engine cares about, and the body
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub retry_after: Option<Duration>,
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Minimal HTTP capability the engine depends on
///
/// Implementations return `Ok` for every HTTP status; only transport-level
/// failures (timeouts, refused connections) are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, request: &OutboundRequest) -> Result<RawResponse, FetchError>;

    async fn post_form(
        &self,
        url: &str,
        user_agent: &str,
        form: &[(String, String)],
    ) -> Result<RawResponse, FetchError>;
}

/// reqwest-backed transport
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a transport with the given per-request timeout
    ///
    /// The user agent is set per request so identities can rotate.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::limited(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client })
    }

    async fn read(url: &str, response: Response) -> Result<RawResponse, FetchError> {
        let status = response.status().as_u16();
        let headers = response.headers();

        let header = |name| {
            headers
                .get(name)
                .and_then(|v: &reqwest::header::HeaderValue| v.to_str().ok())
                .map(|v| v.to_string())
        };

        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);
        let retry_after = header(RETRY_AFTER).and_then(|v| parse_retry_after(&v, Utc::now()));
        let set_cookies = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(url, &e))?
            .to_vec();

        Ok(RawResponse {
            status,
            etag,
            last_modified,
            retry_after,
            set_cookies,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: &OutboundRequest) -> Result<RawResponse, FetchError> {
        let mut builder = self
            .client
            .get(&request.url)
            .header(USER_AGENT, &request.user_agent);

        if let Some(etag) = &request.validators.etag {
            builder = builder.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &request.validators.last_modified {
            builder = builder.header(IF_MODIFIED_SINCE, last_modified);
        }
        if let Some(cookie) = &request.cookie {
            builder = builder.header(COOKIE, cookie);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(&request.url, &e))?;

        Self::read(&request.url, response).await
    }

    async fn post_form(
        &self,
        url: &str,
        user_agent: &str,
        form: &[(String, String)],
    ) -> Result<RawResponse, FetchError> {
        let response = self
            .client
            .post(url)
            .header(USER_AGENT, user_agent)
            .form(form)
            .send()
            .await
            .map_err(|e| classify_transport_error(url, &e))?;

        Self::read(url, response).await
    }
}

/// Maps an HTTP status to the engine's error taxonomy
///
/// # Retry Logic
///
/// | Condition | Result |
/// |-----------|--------|
/// | 2xx, 304 | Ok |
/// | 429, 503 | Retryable (honors Retry-After) |
/// | 408, 500, 502, 504 | Retryable |
/// | 403 | Hostile |
/// | 404, 410 | Missing |
/// | anything else | Fatal |
pub fn classify_status(
    url: &str,
    status: u16,
    retry_after: Option<Duration>,
) -> Result<(), FetchError> {
    match status {
        200..=299 | 304 => Ok(()),
        429 | 503 | 408 | 500 | 502 | 504 => Err(FetchError::Retryable {
            url: url.to_string(),
            reason: format!("HTTP {}", status),
            status: Some(status),
            retry_after,
        }),
        403 => Err(FetchError::Hostile {
            url: url.to_string(),
            reason: "HTTP 403".to_string(),
            status: Some(status),
        }),
        404 | 410 => Err(FetchError::Missing {
            url: url.to_string(),
            status,
        }),
        _ => Err(FetchError::Fatal {
            url: url.to_string(),
            reason: format!("HTTP {}", status),
            status: Some(status),
        }),
    }
}

/// Classifies a reqwest error; timeouts and connection failures are retryable
fn classify_transport_error(url: &str, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Retryable {
            url: url.to_string(),
            reason: "request timed out".to_string(),
            status: None,
            retry_after: None,
        }
    } else if error.is_connect() || error.is_request() || error.is_body() {
        FetchError::Retryable {
            url: url.to_string(),
            reason: format!("connection failed: {}", error),
            status: None,
            retry_after: None,
        }
    } else {
        FetchError::Fatal {
            url: url.to_string(),
            reason: error.to_string(),
            status: None,
        }
    }
}

/// Parses a Retry-After header: delta-seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Round-robin pool of client identities
pub struct UserAgentPool {
    agents: Vec<String>,
    current: AtomicUsize,
}

impl UserAgentPool {
    pub fn new(agents: Vec<String>) -> Self {
        Self {
            agents,
            current: AtomicUsize::new(0),
        }
    }

    /// The identity requests are currently sent with
    pub fn current(&self) -> &str {
        if self.agents.is_empty() {
            return concat!("delta-harvest/", env!("CARGO_PKG_VERSION"));
        }
        let index = self.current.load(Ordering::Relaxed) % self.agents.len();
        &self.agents[index]
    }

    /// Switches to the next identity and returns it
    pub fn rotate(&self) -> &str {
        if self.agents.len() > 1 {
            self.current.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Rotated client identity to '{}'", self.current());
        }
        self.current()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_classify_status() {
        let url = "https://example.com/a";
        assert!(classify_status(url, 200, None).is_ok());
        assert!(classify_status(url, 304, None).is_ok());
        assert!(classify_status(url, 429, None).unwrap_err().is_retryable());
        assert!(classify_status(url, 503, None).unwrap_err().is_retryable());
        assert!(matches!(
            classify_status(url, 403, None),
            Err(FetchError::Hostile { .. })
        ));
        assert!(matches!(
            classify_status(url, 404, None),
            Err(FetchError::Missing { status: 404, .. })
        ));
        assert!(matches!(
            classify_status(url, 400, None),
            Err(FetchError::Fatal { .. })
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 0).unwrap();
        assert_eq!(
            parse_retry_after("120", now),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(60))
        );
        // Dates in the past mean "now"
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn test_user_agent_rotation() {
        let pool = UserAgentPool::new(vec!["A/1".to_string(), "B/1".to_string()]);
        assert_eq!(pool.current(), "A/1");
        assert_eq!(pool.rotate(), "B/1");
        assert_eq!(pool.rotate(), "A/1");

        let single = UserAgentPool::new(vec!["Only/1".to_string()]);
        assert_eq!(single.rotate(), "Only/1");
    }

    #[tokio::test]
    async fn test_reqwest_transport_sends_validators_and_reads_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .and(header("if-none-match", "\"v1\""))
            .and(header("user-agent", "TestHarvester/1.0"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "5")
                    .insert_header("etag", "\"v2\""),
            )
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let response = transport
            .get(&OutboundRequest {
                url: format!("{}/a", server.uri()),
                user_agent: "TestHarvester/1.0".to_string(),
                validators: Validators {
                    etag: Some("\"v1\"".to_string()),
                    last_modified: None,
                },
                cookie: None,
            })
            .await
            .unwrap();

        assert_eq!(response.status, 429);
        assert_eq!(response.retry_after, Some(Duration::from_secs(5)));
        assert_eq!(response.etag.as_deref(), Some("\"v2\""));
    }
}
