use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use tracing::{debug, info};

use crate::auth::{AuthStrategy, CredentialLogin};
use crate::coordinator::{
    AccountHandle, CoordinatorBuilder, Notifier, DEFAULT_SCAN_INTERVAL,
};
use crate::logger::MessageLogMode;
use crate::protocol::{
    DEFAULT_BASE_URL, DEFAULT_DASHBOARD_MARKER, DEFAULT_IDENTITY_MARKER, DEFAULT_LOGIN_PATH,
};
use crate::session::{SessionClient, DEFAULT_REQUEST_TIMEOUT};
use crate::{Error, Result};

/// How the account authenticates. A table with `cookie` is token mode; one
/// with `username` and `password` is credential mode.
#[derive(Clone, Deserialize)]
#[serde(untagged)]
pub enum AccountConfig {
    Cookie { cookie: String },
    Credentials { username: String, password: String },
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountConfig::Cookie { .. } => f.write_str("Cookie { .. }"),
            AccountConfig::Credentials { username, .. } => f
                .debug_struct("Credentials")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

impl AccountConfig {
    pub fn strategy(&self, options: &BridgeOptions) -> Result<AuthStrategy> {
        match self {
            AccountConfig::Cookie { .. } => Ok(AuthStrategy::Token),
            AccountConfig::Credentials { username, password } => {
                let login = CredentialLogin::builder(
                    username.clone(),
                    SecretString::from(password.clone()),
                )
                .base_url(&options.base_url)
                .login_path(&options.login_path)
                .identity_marker(&options.identity_marker)
                .dashboard_marker(&options.dashboard_marker)
                .timeout(options.request_timeout())
                .build()?;
                Ok(AuthStrategy::Credentials(login))
            }
        }
    }

    fn cookie(&self) -> Option<&str> {
        match self {
            AccountConfig::Cookie { cookie } => Some(cookie),
            AccountConfig::Credentials { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    pub base_url: String,
    /// Seconds between scheduled polls.
    pub scan_interval: u64,
    /// Per-request timeout in seconds.
    pub request_timeout: u64,
    pub login_path: String,
    pub identity_marker: String,
    pub dashboard_marker: String,
    /// NDJSON wire log; disabled when unset.
    pub message_log: Option<String>,
    pub message_log_mode: MessageLogMode,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            scan_interval: DEFAULT_SCAN_INTERVAL.as_secs(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            identity_marker: DEFAULT_IDENTITY_MARKER.to_string(),
            dashboard_marker: DEFAULT_DASHBOARD_MARKER.to_string(),
            message_log: None,
            message_log_mode: MessageLogMode::Full,
        }
    }
}

impl BridgeOptions {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub account: AccountConfig,
    #[serde(default)]
    pub options: BridgeOptions,
}

impl BridgeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading configuration");
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn check(&self) -> Result<()> {
        match &self.account {
            AccountConfig::Cookie { cookie } if cookie.trim().is_empty() => {
                return Err(Error::Config("cookie must not be empty".into()));
            }
            AccountConfig::Credentials { username, password }
                if username.is_empty() || password.is_empty() =>
            {
                return Err(Error::Config("username and password are required".into()));
            }
            _ => {}
        }
        if self.options.scan_interval == 0 {
            return Err(Error::Config("scan_interval must be at least one second".into()));
        }
        if self.options.request_timeout == 0 {
            return Err(Error::Config("request_timeout must be at least one second".into()));
        }
        url::Url::parse(&self.options.base_url)
            .map_err(|e| Error::Config(format!("invalid base_url: {e}")))?;
        Ok(())
    }

    pub fn session(&self) -> Result<SessionClient> {
        let mut builder = SessionClient::builder()
            .base_url(&self.options.base_url)
            .timeout(self.options.request_timeout());
        if let Some(cookie) = self.account.cookie() {
            builder = builder.cookie(cookie);
        }
        if let Some(path) = &self.options.message_log {
            builder = builder.message_log(self.options.message_log_mode, path);
        }
        builder.build()
    }

    /// Coordinator wiring for this account; callers may add callbacks before
    /// building.
    pub fn coordinator(&self, notifier: Arc<dyn Notifier>) -> Result<CoordinatorBuilder> {
        let session = self.session()?;
        let strategy = self.account.strategy(&self.options)?;
        Ok(CoordinatorBuilder::new(session, strategy).notifier(notifier))
    }

    /// Set the account up: first refresh must succeed, then polling starts.
    pub async fn start(&self, notifier: Arc<dyn Notifier>) -> Result<AccountHandle> {
        let coordinator = self.coordinator(notifier)?.build();
        AccountHandle::start(coordinator, self.options.scan_interval()).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub title: String,
    /// Session obtained during validation, for the host to store.
    pub cookie: String,
}

/// One-shot check of an account before it is saved: obtain a session and
/// fetch the user context once.
pub async fn validate_account(config: &BridgeConfig) -> Result<AccountInfo> {
    let mut session = config.session()?;
    if let AuthStrategy::Credentials(login) = config.account.strategy(&config.options)? {
        session.set_cookie(login.login().await?);
    }

    let context = session.fetch_user_context().await?;
    let title = format!("MELCloud Home ({})", context.account_title());
    info!(title = %title, "account validated");

    let cookie = session.cookie().unwrap_or_default().to_string();
    Ok(AccountInfo { title, cookie })
}

/// Form error key for a failed `validate_account`.
pub fn validation_error_key(account: &AccountConfig, err: &Error) -> &'static str {
    match err {
        Error::Unauthorized | Error::EmptyContext | Error::Decode(_) => match account {
            AccountConfig::Cookie { .. } => "invalid_cookie",
            AccountConfig::Credentials { .. } => "invalid_auth",
        },
        Error::Login(_) => "invalid_auth",
        e if e.is_transport() => "cannot_connect",
        _ => "unknown",
    }
}
