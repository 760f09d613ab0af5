//! Platform client error types.

use std::time::Duration;

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Errors returned by the Twitch and Discord clients.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Transport-level failure (DNS, TLS, connect, timeout, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The remote asked us to slow down.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Credentials were rejected or could not be obtained.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The remote sent something we could not make sense of.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A websocket connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlatformError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } | Self::Connection(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Auth(_) | Self::Protocol(_) | Self::Json(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PlatformError::RateLimited { retry_after: None }.is_transient());
        assert!(
            PlatformError::Status {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !PlatformError::Status {
                status: 404,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!PlatformError::auth("bad secret").is_transient());
        assert!(PlatformError::connection("reset").is_transient());
    }
}
