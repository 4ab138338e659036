use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Unauthorized,
    Status { status: u16, body: String },
    Decode(serde_json::Error),
    EmptyContext,
    Login(String),
    Validation(String),
    Notification(String),
    UpdateFailed { failures: u32, source: Box<Error> },
    Config(String),
    Toml(toml::de::Error),
    Io(std::io::Error),
}

impl Error {
    /// True when the remote rejected the session. Only this triggers a re-login.
    pub fn is_auth(&self) -> bool {
        match self {
            Error::Unauthorized => true,
            Error::UpdateFailed { source, .. } => source.is_auth(),
            _ => false,
        }
    }

    pub fn is_transport(&self) -> bool {
        match self {
            Error::Http(_) | Error::Status { .. } => true,
            Error::UpdateFailed { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Unauthorized => write!(f, "session rejected (HTTP 401)"),
            Error::Status { status, body } => write!(f, "unexpected HTTP status {status}: {body}"),
            Error::Decode(e) => write!(f, "malformed user context: {e}"),
            Error::EmptyContext => write!(f, "empty user context"),
            Error::Login(msg) => write!(f, "login failed: {msg}"),
            Error::Validation(msg) => write!(f, "invalid parameters: {msg}"),
            Error::Notification(msg) => write!(f, "notification delivery failed: {msg}"),
            Error::UpdateFailed { failures, source } => {
                write!(f, "update failed ({failures} consecutive): {source}")
            }
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Toml(e) => write!(f, "TOML error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Toml(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::UpdateFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Toml(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
