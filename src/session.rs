use std::time::Duration;

use reqwest::header::COOKIE;
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    parse_user_context, unit_path, CSRF_HEADER, DEFAULT_BASE_URL, USER_AGENT, USER_CONTEXT_PATH,
};
use crate::types::{UnitType, UserContext};
use crate::{Error, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SessionClientBuilder {
    base_url: String,
    timeout: Duration,
    cookie: Option<String>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl Default for SessionClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            cookie: None,
            log_mode: None,
            log_path: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Install an externally obtained session cookie.
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<SessionClient> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        Ok(SessionClient {
            http,
            base_url: self.base_url,
            cookie: self.cookie.filter(|c| !c.trim().is_empty()),
            logger,
        })
    }
}

/// Authenticated access to the account context and per-unit writes.
pub struct SessionClient {
    http: reqwest::Client,
    base_url: String,
    cookie: Option<String>,
    logger: Option<MessageLogger>,
}

impl SessionClient {
    pub fn builder() -> SessionClientBuilder {
        SessionClientBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    pub fn set_cookie(&mut self, cookie: impl Into<String>) {
        self.cookie = Some(cookie.into());
    }

    pub(crate) fn record_command(&mut self, action: &str, unit_id: &str, body: &Value) {
        if let Some(ref mut logger) = self.logger {
            logger.log_command(action, unit_id, body);
        }
    }

    /// `GET /api/user/context`. A 401 (or no installed session) is
    /// `Error::Unauthorized`; every other failure is a transport error.
    pub async fn fetch_user_context(&mut self) -> Result<UserContext> {
        let Some(cookie) = self.cookie.clone() else {
            debug!("no session installed, treating as unauthorized");
            return Err(Error::Unauthorized);
        };

        let url = format!("{}{}", self.base_url, USER_CONTEXT_PATH);
        trace!(url = %url, "fetching user context");
        if let Some(ref mut logger) = self.logger {
            logger.log_request("GET", USER_CONTEXT_PATH, None);
        }

        let resp = self
            .http
            .get(&url)
            .header(CSRF_HEADER, "1")
            .header(COOKIE, cookie)
            .send()
            .await?;
        let status = resp.status().as_u16();

        match status {
            200 => {}
            401 => {
                warn!("session rejected by the service");
                if let Some(ref mut logger) = self.logger {
                    logger.log_poll(status, &Value::Null);
                }
                return Err(Error::Unauthorized);
            }
            s => {
                let body = resp.text().await.unwrap_or_default();
                error!(status = s, "user context request failed");
                if let Some(ref mut logger) = self.logger {
                    logger.log_poll(s, &Value::Null);
                }
                return Err(Error::Status { status: s, body });
            }
        }

        let body = resp.text().await?;
        if let Some(ref mut logger) = self.logger {
            let body_json = serde_json::from_str(&body).unwrap_or(Value::Null);
            logger.log_poll(status, &body_json);
        }

        parse_user_context(&body)
    }

    /// `PUT /api/<atwunit|ataunit>/<id>` with a sparse body. 200 and 204 are
    /// success. Does not touch any snapshot; callers poll to observe the effect.
    pub async fn apply_unit_state(
        &mut self,
        unit_type: UnitType,
        unit_id: &str,
        state: &Value,
    ) -> Result<()> {
        let Some(cookie) = self.cookie.clone() else {
            return Err(Error::Unauthorized);
        };

        let path = unit_path(unit_type, unit_id);
        let url = format!("{}{}", self.base_url, path);
        debug!(unit_id, %unit_type, body = %state, "applying unit state");
        if let Some(ref mut logger) = self.logger {
            logger.log_request("PUT", &path, Some(state));
        }

        let resp = self
            .http
            .put(&url)
            .header(CSRF_HEADER, "1")
            .header(COOKIE, cookie)
            .json(state)
            .send()
            .await?;
        let status = resp.status().as_u16();

        if matches!(status, 200 | 204) {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        if let Some(ref mut logger) = self.logger {
            logger.log_response("apply_unit_state", status, &body);
        }
        Err(Error::Status { status, body })
    }
}
