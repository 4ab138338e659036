use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};
use url::Url;

use crate::protocol::{
    classify_landing, extract_csrf_token, LoginLanding, CSRF_FIELD, DEFAULT_BASE_URL,
    DEFAULT_DASHBOARD_MARKER, DEFAULT_IDENTITY_MARKER, DEFAULT_LOGIN_PATH, USER_AGENT,
};
use crate::session::DEFAULT_REQUEST_TIMEOUT;
use crate::{Error, Result};

/// How the session is obtained. Fixed for the lifetime of a coordinator.
pub enum AuthStrategy {
    /// Session cookie supplied out of band. A rejected session stays rejected
    /// until the operator provides a new one.
    Token,
    /// Scripted form login, repeatable after the session expires.
    Credentials(CredentialLogin),
}

impl AuthStrategy {
    pub fn can_reauthenticate(&self) -> bool {
        matches!(self, AuthStrategy::Credentials(_))
    }
}

impl std::fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStrategy::Token => f.write_str("Token"),
            AuthStrategy::Credentials(login) => f
                .debug_struct("Credentials")
                .field("username", &login.username)
                .finish_non_exhaustive(),
        }
    }
}

pub struct CredentialLoginBuilder {
    username: String,
    password: SecretString,
    base_url: String,
    login_path: String,
    identity_marker: String,
    dashboard_marker: String,
    timeout: Duration,
}

impl CredentialLoginBuilder {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
            base_url: DEFAULT_BASE_URL.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            identity_marker: DEFAULT_IDENTITY_MARKER.to_string(),
            dashboard_marker: DEFAULT_DASHBOARD_MARKER.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Substring of the identity provider's origin (scheme, host, port).
    pub fn identity_marker(mut self, marker: impl Into<String>) -> Self {
        self.identity_marker = marker.into();
        self
    }

    pub fn dashboard_marker(mut self, marker: impl Into<String>) -> Self {
        self.dashboard_marker = marker.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<CredentialLogin> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid base URL {}: {e}", self.base_url)))?;
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        Ok(CredentialLogin {
            http,
            jar,
            base_url,
            login_path: self.login_path,
            identity_marker: self.identity_marker,
            dashboard_marker: self.dashboard_marker,
            username: self.username,
            password: self.password,
        })
    }
}

/// Form login against the identity provider. Each call yields a fresh
/// `Cookie` header value for the service domain.
pub struct CredentialLogin {
    http: reqwest::Client,
    jar: Arc<Jar>,
    base_url: Url,
    login_path: String,
    identity_marker: String,
    dashboard_marker: String,
    username: String,
    password: SecretString,
}

impl CredentialLogin {
    pub fn builder(username: impl Into<String>, password: SecretString) -> CredentialLoginBuilder {
        CredentialLoginBuilder::new(username, password)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn login(&self) -> Result<String> {
        let start = format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.login_path
        );
        debug!(url = %start, "starting login");

        let resp = self.http.get(&start).send().await?;
        let landed = resp.url().clone();

        match classify_landing(&landed, &self.identity_marker, &self.dashboard_marker) {
            LoginLanding::IdentityProvider => {}
            LoginLanding::Dashboard => {
                warn!(url = %landed, "login entry point went straight to the dashboard, reusing existing session");
                return self.harvest_cookies();
            }
            LoginLanding::Unexpected => {
                return Err(Error::Login(format!("unexpected redirect to {landed}")));
            }
        }

        let html = resp.text().await?;
        let token = extract_csrf_token(&html)
            .ok_or_else(|| Error::Login("anti-forgery token not found on login page".into()))?;

        let form = [
            (CSRF_FIELD, token.as_str()),
            ("username", self.username.as_str()),
            ("password", self.password.expose_secret()),
        ];
        debug!(url = %landed, "submitting credentials");
        let resp = self.http.post(landed).form(&form).send().await?;
        let finished = resp.url().clone();

        if classify_landing(&finished, &self.identity_marker, &self.dashboard_marker)
            != LoginLanding::Dashboard
        {
            return Err(Error::Login(format!(
                "credentials not accepted (ended at {})",
                finished.path()
            )));
        }

        let cookie = self.harvest_cookies()?;
        info!(username = %self.username, "logged in");
        Ok(cookie)
    }

    fn harvest_cookies(&self) -> Result<String> {
        self.jar
            .cookies(&self.base_url)
            .and_then(|v| v.to_str().ok().map(str::to_string))
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Login("no session cookies for the service domain".into()))
    }
}
