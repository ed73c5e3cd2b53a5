//! Login flows

use crate::config::SessionConfig;
use crate::fetch::HttpTransport;
use crate::{HarvestError, Result};
use async_trait::async_trait;

/// Something that can log in and hand back the resulting cookies
#[async_trait]
pub trait LoginFlow: Send + Sync {
    /// URL the flow posts to; used to rate limit the login request
    fn url(&self) -> &str;

    /// Performs the login and returns the `Set-Cookie` values received
    async fn login(&self, transport: &dyn HttpTransport, user_agent: &str)
        -> Result<Vec<String>>;
}

/// Posts a username/password form
pub struct FormLogin {
    url: String,
    form: Vec<(String, String)>,
}

impl FormLogin {
    pub fn new(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            form,
        }
    }

    /// Builds the flow from `[session]`; `None` unless auto-login is fully configured
    pub fn from_config(config: &SessionConfig) -> Option<Self> {
        if !config.auto_login {
            return None;
        }
        let url = config.login_url.as_ref()?;
        let username = config.username.as_ref()?;
        let password = config.password.as_ref()?;

        Some(Self::new(
            url.clone(),
            vec![
                (config.username_field.clone(), username.clone()),
                (config.password_field.clone(), password.clone()),
            ],
        ))
    }
}

#[async_trait]
impl LoginFlow for FormLogin {
    fn url(&self) -> &str {
        &self.url
    }

    async fn login(
        &self,
        transport: &dyn HttpTransport,
        user_agent: &str,
    ) -> Result<Vec<String>> {
        let response = transport.post_form(&self.url, user_agent, &self.form).await?;

        if !(200..400).contains(&response.status) {
            return Err(HarvestError::Login(format!(
                "{} answered HTTP {}",
                self.url, response.status
            )));
        }
        if response.set_cookies.is_empty() {
            return Err(HarvestError::Login(format!(
                "{} set no cookies",
                self.url
            )));
        }

        Ok(response.set_cookies)
    }
}
