//! Gated request pipeline
//!
//! Every request the engine sends goes through [`RequestGate::get`]:
//! robots.txt check, per-host admission, the request itself, outcome
//! bookkeeping, bounded retries and the single re-login retry.

use crate::config::Config;
use crate::discovery::PageSource;
use crate::fetch::{
    classify_status, FetchError, HttpTransport, OutboundRequest, RawResponse, UserAgentPool,
    Validators,
};
use crate::robots::{RobotsCache, RobotsRules};
use crate::session::{AuthCheck, SessionManager};
use crate::throttle::{RateLimitSettings, RateLimiter, RequestOutcome};
use crate::url::{host_key, robots_url};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

/// Shared front door to the network
pub struct RequestGate {
    transport: Arc<dyn HttpTransport>,
    limiter: RateLimiter,
    agents: UserAgentPool,
    session: Option<SessionManager>,
    robots: Option<RobotsCache>,
    max_attempts: u32,
}

impl RequestGate {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        limiter: RateLimiter,
        agents: UserAgentPool,
        max_attempts: u32,
    ) -> Self {
        Self {
            transport,
            limiter,
            agents,
            session: None,
            robots: None,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Builds the gate described by `config` around `transport`
    pub fn from_config(config: &Config, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let limiter = RateLimiter::new(RateLimitSettings::from(&config.rate_limit));
        let agents = UserAgentPool::new(config.user_agent.agents.clone());
        let mut gate = Self::new(transport, limiter, agents, config.engine.max_attempts);

        if let Some(session) = &config.session {
            gate = gate.with_session(SessionManager::from_config(session)?);
        }
        if config.engine.respect_robots {
            gate = gate.with_robots();
        }
        Ok(gate)
    }

    pub fn with_session(mut self, session: SessionManager) -> Self {
        self.session = Some(session);
        self
    }

    /// Enables robots.txt checks (fetched once per host)
    pub fn with_robots(mut self) -> Self {
        self.robots = Some(RobotsCache::new());
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn user_agent(&self) -> &str {
        self.agents.current()
    }

    /// GETs `url`, returning only 2xx and 304 responses
    ///
    /// Transient failures are retried up to the attempt ceiling. A page
    /// served to a logged-out session triggers one re-login and one retry;
    /// a second logged-out page is [`HarvestError::AuthExpired`].
    pub async fn get(&self, url: &str, validators: &Validators) -> Result<RawResponse> {
        let host = host_key(url)?;
        self.check_robots(url, &host).await?;

        let response = self.send_with_retries(url, &host, validators).await?;

        let Some(session) = &self.session else {
            return Ok(response);
        };
        if response.status == 304 {
            return Ok(response);
        }

        match session.ensure_authenticated(url, &response.text(), false)? {
            AuthCheck::Valid => Ok(response),
            AuthCheck::RetryOnce => {
                self.relogin(session).await?;
                let retried = self.send_with_retries(url, &host, validators).await?;
                if retried.status != 304 {
                    session.ensure_authenticated(url, &retried.text(), true)?;
                }
                Ok(retried)
            }
        }
    }

    async fn send_with_retries(
        &self,
        url: &str,
        host: &str,
        validators: &Validators,
    ) -> Result<RawResponse> {
        let mut attempt = 1;
        loop {
            match self.send_once(url, host, validators).await {
                Err(HarvestError::Fetch(e)) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::debug!(
                        "Attempt {}/{} for {} failed, retrying: {}",
                        attempt,
                        self.max_attempts,
                        url,
                        e
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// One admitted request; the outcome is charged to `host`
    async fn send_once(
        &self,
        url: &str,
        host: &str,
        validators: &Validators,
    ) -> Result<RawResponse> {
        self.limiter.acquire(host).await?;

        let request = OutboundRequest {
            url: url.to_string(),
            user_agent: self.agents.current().to_string(),
            validators: validators.clone(),
            cookie: self.session.as_ref().and_then(|s| s.cookie_header()),
        };
        tracing::debug!("GET {} (conditional: {})", url, !validators.is_empty());

        let response = match self.transport.get(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.record(host, &e.request_outcome());
                return Err(e.into());
            }
        };

        if let Some(session) = &self.session {
            session.absorb(&response.set_cookies);
        }

        match classify_status(url, response.status, response.retry_after) {
            Ok(()) => {
                self.record(host, &RequestOutcome::Success);
                Ok(response)
            }
            Err(e) => {
                self.record(host, &e.request_outcome());
                Err(e.into())
            }
        }
    }

    fn record(&self, host: &str, outcome: &RequestOutcome) {
        let action = self.limiter.record_outcome(host, outcome, Instant::now());
        if action.rotate_identity {
            self.agents.rotate();
        }
    }

    async fn relogin(&self, session: &SessionManager) -> Result<()> {
        if let Some(login_url) = session.login_url() {
            self.limiter.acquire(&host_key(login_url)?).await?;
        }
        session
            .relogin(self.transport.as_ref(), self.agents.current())
            .await
    }

    async fn check_robots(&self, url: &str, host: &str) -> Result<()> {
        let Some(cache) = &self.robots else {
            return Ok(());
        };

        let rules = match cache.get(host) {
            Some(rules) => rules,
            None => {
                let rules = self.fetch_robots(url, host).await?;
                cache.insert(host, rules)
            }
        };

        if rules.is_allowed(url, self.agents.current()) {
            Ok(())
        } else {
            tracing::info!("{} is disallowed by robots.txt", url);
            Err(HarvestError::RobotsDenied {
                url: url.to_string(),
            })
        }
    }

    async fn fetch_robots(&self, url: &str, host: &str) -> Result<RobotsRules> {
        let location = robots_url(url)?;
        self.limiter.acquire(host).await?;

        let request = OutboundRequest {
            url: location.clone(),
            user_agent: self.agents.current().to_string(),
            validators: Validators::default(),
            cookie: None,
        };

        let rules = match self.transport.get(&request).await {
            Ok(response) => {
                let outcome = match classify_status(&location, response.status, response.retry_after)
                {
                    Ok(()) => RequestOutcome::Success,
                    Err(e) => e.request_outcome(),
                };
                self.record(host, &outcome);
                RobotsRules::from_response(response.status, &response.text())
            }
            Err(e) => {
                tracing::warn!("Could not fetch {}, assuming allow-all: {}", location, e);
                self.record(host, &e.request_outcome());
                RobotsRules::allow_all()
            }
        };

        if let Some(delay) = rules.crawl_delay(self.agents.current()) {
            if delay > self.limiter.settings().min_delay {
                tracing::info!("Honoring Crawl-delay of {:?} for {}", delay, host);
                self.limiter.set_crawl_delay(host, delay);
            }
        }

        Ok(rules)
    }
}

#[async_trait]
impl PageSource for RequestGate {
    async fn fetch_page(&self, url: &str) -> Result<Option<String>> {
        match self.get(url, &Validators::default()).await {
            Ok(response) => Ok(Some(response.text())),
            Err(HarvestError::Fetch(FetchError::Missing { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LoginFlow, LogoutDetector, SessionState};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned responses per URL; unscripted URLs answer 404
    #[derive(Default)]
    struct ScriptedTransport {
        scripts: Mutex<HashMap<String, VecDeque<std::result::Result<RawResponse, FetchError>>>>,
        requests: Mutex<Vec<OutboundRequest>>,
    }

    impl ScriptedTransport {
        fn push(&self, url: &str, response: std::result::Result<RawResponse, FetchError>) {
            self.scripts
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(response);
        }

        fn page(&self, url: &str, status: u16, body: &str) {
            self.push(
                url,
                Ok(RawResponse {
                    status,
                    body: body.as_bytes().to_vec(),
                    ..RawResponse::default()
                }),
            );
        }

        fn requests_to(&self, url: &str) -> Vec<OutboundRequest> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url == url)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, request: &OutboundRequest) -> std::result::Result<RawResponse, FetchError> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&request.url)
                .and_then(|queue| queue.pop_front());
            next.unwrap_or_else(|| {
                Ok(RawResponse {
                    status: 404,
                    ..RawResponse::default()
                })
            })
        }

        async fn post_form(
            &self,
            _url: &str,
            _user_agent: &str,
            _form: &[(String, String)],
        ) -> std::result::Result<RawResponse, FetchError> {
            unreachable!("logins go through CountingLogin in these tests")
        }
    }

    struct CountingLogin {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LoginFlow for CountingLogin {
        fn url(&self) -> &str {
            "https://x.test/login"
        }

        async fn login(&self, _transport: &dyn HttpTransport, _user_agent: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["sid=fresh; Path=/".to_string()])
        }
    }

    fn create_test_settings() -> RateLimitSettings {
        RateLimitSettings {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            failure_threshold: 10,
            cooldown: Duration::from_secs(60),
            max_retry_after: Duration::from_secs(30),
        }
    }

    fn gate(transport: &Arc<ScriptedTransport>, agents: &[&str], max_attempts: u32) -> RequestGate {
        RequestGate::new(
            transport.clone(),
            RateLimiter::new(create_test_settings()),
            UserAgentPool::new(agents.iter().map(|a| a.to_string()).collect()),
            max_attempts,
        )
    }

    const PAGE: &str = "https://x.test/g/1";

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.page(PAGE, 503, "busy");
        transport.page(PAGE, 200, "<p>ok</p>");

        let response = gate(&transport, &["Bot/1"], 3)
            .get(PAGE, &Validators::default())
            .await
            .unwrap();

        assert_eq!(response.text(), "<p>ok</p>");
        assert_eq!(transport.requests_to(PAGE).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling() {
        let transport = Arc::new(ScriptedTransport::default());
        for _ in 0..5 {
            transport.page(PAGE, 503, "busy");
        }

        let result = gate(&transport, &["Bot/1"], 3)
            .get(PAGE, &Validators::default())
            .await;

        assert!(matches!(
            result,
            Err(HarvestError::Fetch(FetchError::Retryable { status: Some(503), .. }))
        ));
        assert_eq!(transport.requests_to(PAGE).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_page_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::default());
        let gate = gate(&transport, &["Bot/1"], 3);

        assert_eq!(gate.fetch_page(PAGE).await.unwrap(), None);
        assert_eq!(transport.requests_to(PAGE).len(), 1);
        // A 404 says nothing bad about the host
        assert_eq!(gate.limiter().failure_count("x.test"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forbidden_rotates_identity() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.page(PAGE, 403, "go away");
        transport.page(PAGE, 200, "ok");
        let gate = gate(&transport, &["Bot/A", "Bot/B"], 1);

        assert!(matches!(
            gate.get(PAGE, &Validators::default()).await,
            Err(HarvestError::Fetch(FetchError::Hostile { .. }))
        ));
        gate.get(PAGE, &Validators::default()).await.unwrap();

        let agents: Vec<String> = transport
            .requests_to(PAGE)
            .into_iter()
            .map(|r| r.user_agent)
            .collect();
        assert_eq!(agents, vec!["Bot/A", "Bot/B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relogin_retries_exactly_once() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.page(PAGE, 200, r#"<form><input type="password"></form>"#);
        transport.page(PAGE, 200, r#"<a class="logout">out</a><p>data</p>"#);

        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let session = SessionManager::new(
            dir.path().join("cookies.toml"),
            SessionState::default(),
            LogoutDetector::new("form input[type='password']", Some("a.logout")).unwrap(),
        )
        .with_login(Box::new(CountingLogin {
            calls: calls.clone(),
        }));
        let gate = gate(&transport, &["Bot/1"], 1).with_session(session);

        let response = gate.get(PAGE, &Validators::default()).await.unwrap();
        assert!(response.text().contains("data"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let requests = transport.requests_to(PAGE);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].cookie.as_deref(), Some("sid=fresh"));
        assert!(dir.path().join("cookies.toml").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_logout_is_terminal() {
        let transport = Arc::new(ScriptedTransport::default());
        for _ in 0..3 {
            transport.page(PAGE, 200, r#"<form><input type="password"></form>"#);
        }

        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let session = SessionManager::new(
            dir.path().join("cookies.toml"),
            SessionState::default(),
            LogoutDetector::new("form input[type='password']", None).unwrap(),
        )
        .with_login(Box::new(CountingLogin {
            calls: calls.clone(),
        }));
        let gate = gate(&transport, &["Bot/1"], 1).with_session(session);

        assert!(matches!(
            gate.get(PAGE, &Validators::default()).await,
            Err(HarvestError::AuthExpired { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.requests_to(PAGE).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_robots_disallow_sends_nothing() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.page(
            "https://x.test/robots.txt",
            200,
            "User-agent: *\nDisallow: /private/\nCrawl-delay: 2\n",
        );
        let gate = gate(&transport, &["Bot/1"], 1).with_robots();

        assert!(matches!(
            gate.get("https://x.test/private/1", &Validators::default()).await,
            Err(HarvestError::RobotsDenied { .. })
        ));
        assert!(transport.requests_to("https://x.test/private/1").is_empty());

        // robots.txt is fetched once per host
        gate.get("https://x.test/private/2", &Validators::default())
            .await
            .unwrap_err();
        assert_eq!(transport.requests_to("https://x.test/robots.txt").len(), 1);

        let state = gate.limiter().snapshot("x.test").unwrap();
        assert_eq!(state.crawl_delay, Some(Duration::from_secs(2)));
    }
}
