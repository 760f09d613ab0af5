//! Shared HTTP plumbing for the platform clients.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tracing::debug;

use crate::error::{PlatformError, Result};

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("nerodia/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the `reqwest::Client` shared by the Twitch and Discord clients.
///
/// A zero `timeout` leaves requests unbounded.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
    if timeout > Duration::ZERO {
        builder = builder.timeout(timeout);
    }

    builder.build().map_err(PlatformError::from)
}

/// Parse the back-off hint of a 429 response.
///
/// `Retry-After` is tried first, then Discord's `X-RateLimit-Reset-After`.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    ["Retry-After", "X-RateLimit-Reset-After"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.trim().parse::<f64>().ok())
        .find(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Turn a non-success response into a [`PlatformError`].
pub(crate) async fn error_for_response(response: reqwest::Response) -> PlatformError {
    let status = response.status();
    if status.as_u16() == 429 {
        return PlatformError::RateLimited {
            retry_after: parse_retry_after(response.headers()),
        };
    }

    let body = response.text().await.unwrap_or_default();
    PlatformError::Status {
        status: status.as_u16(),
        body,
    }
}
