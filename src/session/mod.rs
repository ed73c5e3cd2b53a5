//! Session / auth manager
//!
//! Keeps cookies in a jar file, spots pages served to a logged-out session
//! and re-logs in at most once per target.

mod jar;
mod login;

pub use jar::SessionState;
pub use login::{FormLogin, LoginFlow};

use crate::config::SessionConfig;
use crate::fetch::HttpTransport;
use crate::{ConfigError, HarvestError, Result};
use chrono::Utc;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What the caller should do with a fetched page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCheck {
    /// The page was served to an authenticated session
    Valid,
    /// Logged out; re-login has been requested, retry the request once
    RetryOnce,
}

/// Recognizes pages served to a logged-out session
#[derive(Debug, Clone)]
pub struct LogoutDetector {
    login_form_selector: String,
    auth_selector: Option<String>,
}

impl LogoutDetector {
    pub fn new(login_form_selector: &str, auth_selector: Option<&str>) -> Result<Self> {
        parse_selector(login_form_selector)?;
        if let Some(selector) = auth_selector {
            parse_selector(selector)?;
        }
        Ok(Self {
            login_form_selector: login_form_selector.to_string(),
            auth_selector: auth_selector.map(str::to_string),
        })
    }

    /// True if a login form is present or the authenticated-only marker is absent
    pub fn is_logged_out(&self, body: &str) -> bool {
        let document = Html::parse_document(body);

        if let Ok(login_form) = Selector::parse(&self.login_form_selector) {
            if document.select(&login_form).next().is_some() {
                return true;
            }
        }

        match self.auth_selector.as_deref().map(Selector::parse) {
            Some(Ok(marker)) => document.select(&marker).next().is_none(),
            _ => false,
        }
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| {
        HarvestError::Config(ConfigError::InvalidPattern(format!(
            "selector '{}': {:?}",
            selector, e
        )))
    })
}

/// Cookie persistence plus one-shot re-login
pub struct SessionManager {
    cookie_file: PathBuf,
    state: Mutex<SessionState>,
    detector: LogoutDetector,
    login: Option<Box<dyn LoginFlow>>,
}

impl SessionManager {
    /// Loads the cookie jar and builds the login flow from `[session]`
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let cookie_file = PathBuf::from(&config.cookie_file);
        let state = SessionState::load(&cookie_file)?;
        let detector = LogoutDetector::new(
            &config.login_form_selector,
            config.auth_selector.as_deref(),
        )?;

        tracing::debug!(
            "Loaded {} cookies from {}",
            state.cookies.len(),
            cookie_file.display()
        );

        let mut manager = Self::new(cookie_file, state, detector);
        if let Some(flow) = FormLogin::from_config(config) {
            manager = manager.with_login(Box::new(flow));
        }
        Ok(manager)
    }

    pub fn new(cookie_file: PathBuf, state: SessionState, detector: LogoutDetector) -> Self {
        Self {
            cookie_file,
            state: Mutex::new(state),
            detector,
            login: None,
        }
    }

    pub fn with_login(mut self, flow: Box<dyn LoginFlow>) -> Self {
        self.login = Some(flow);
        self
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cookie_header(&self) -> Option<String> {
        self.state().cookie_header()
    }

    /// Keeps cookies refreshed by ordinary responses (not persisted until the next login)
    pub fn absorb(&self, set_cookies: &[String]) {
        if !set_cookies.is_empty() {
            self.state().absorb_set_cookies(set_cookies);
        }
    }

    /// URL the login flow posts to, if auto-login is enabled
    pub fn login_url(&self) -> Option<&str> {
        self.login.as_deref().map(|flow| flow.url())
    }

    /// Checks a fetched page for logout markers
    ///
    /// `already_retried` is true when this page is the result of the one
    /// retry after a re-login; a second logout is terminal for the target.
    pub fn ensure_authenticated(
        &self,
        url: &str,
        body: &str,
        already_retried: bool,
    ) -> Result<AuthCheck> {
        if !self.detector.is_logged_out(body) {
            return Ok(AuthCheck::Valid);
        }

        if already_retried || self.login.is_none() {
            tracing::warn!("Session still logged out at {}", url);
            return Err(HarvestError::AuthExpired {
                url: url.to_string(),
            });
        }

        tracing::info!("Logged out at {}, re-login required", url);
        Ok(AuthCheck::RetryOnce)
    }

    /// Runs the login flow and persists the new cookies
    pub async fn relogin(&self, transport: &dyn HttpTransport, user_agent: &str) -> Result<()> {
        let flow = self
            .login
            .as_deref()
            .ok_or_else(|| HarvestError::Login("auto-login is not configured".to_string()))?;

        let set_cookies = flow.login(transport, user_agent).await?;

        let snapshot = {
            let mut state = self.state();
            state.absorb_set_cookies(&set_cookies);
            state.authenticated_at = Some(Utc::now());
            state.clone()
        };

        snapshot.save(&self.cookie_file)?;
        tracing::info!(
            "Logged in via {}, saved {} cookies to {}",
            flow.url(),
            snapshot.cookies.len(),
            self.cookie_file.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGGED_OUT: &str = r#"<html><body><form id="login"><input type="password"></form></body></html>"#;
    const LOGGED_IN: &str = r#"<html><body><a class="logout" href="/logout">Log out</a><table></table></body></html>"#;

    fn manager(with_login: bool) -> SessionManager {
        let detector = LogoutDetector::new("form input[type='password']", Some("a.logout")).unwrap();
        let dir = std::env::temp_dir().join("delta-harvest-session-test.toml");
        let manager = SessionManager::new(dir, SessionState::default(), detector);
        if with_login {
            manager.with_login(Box::new(FormLogin::new(
                "https://example.com/login",
                vec![("user".to_string(), "me".to_string())],
            )))
        } else {
            manager
        }
    }

    #[test]
    fn test_detector() {
        let detector = LogoutDetector::new("form input[type='password']", Some("a.logout")).unwrap();
        assert!(detector.is_logged_out(LOGGED_OUT));
        assert!(!detector.is_logged_out(LOGGED_IN));
        // No login form but no marker either
        assert!(detector.is_logged_out("<html><body><p>hi</p></body></html>"));
    }

    #[test]
    fn test_invalid_selector_rejected() {
        assert!(LogoutDetector::new("form[[", None).is_err());
    }

    #[test]
    fn test_retry_exactly_once() {
        let manager = manager(true);
        assert_eq!(
            manager.ensure_authenticated("u", LOGGED_IN, false).unwrap(),
            AuthCheck::Valid
        );
        assert_eq!(
            manager.ensure_authenticated("u", LOGGED_OUT, false).unwrap(),
            AuthCheck::RetryOnce
        );
        assert!(matches!(
            manager.ensure_authenticated("u", LOGGED_OUT, true),
            Err(HarvestError::AuthExpired { .. })
        ));
    }

    #[test]
    fn test_logged_out_without_login_is_terminal() {
        let manager = manager(false);
        assert!(matches!(
            manager.ensure_authenticated("u", LOGGED_OUT, false),
            Err(HarvestError::AuthExpired { .. })
        ));
    }
}
