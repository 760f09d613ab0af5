//! Twitch Helix API client.
//!
//! Only the read-only endpoints needed to poll live status are covered.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::models::{HelixResponse, HelixStream, HelixUser, TokenResponse};
use crate::error::{PlatformError, Result};
use crate::http::error_for_response;

const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";
const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Helix accepts at most 100 `user_login` parameters per request.
const MAX_LOGINS_PER_REQUEST: usize = 100;

/// Tokens are refreshed this long before Twitch says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// How the client authenticates against Helix.
#[derive(Debug, Clone)]
pub enum TwitchCredentials {
    /// A pre-issued app access token.
    AppToken {
        client_id: String,
        access_token: String,
    },
    /// Client id and secret, exchanged for an app access token on demand.
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
}

impl TwitchCredentials {
    pub fn client_id(&self) -> &str {
        match self {
            Self::AppToken { client_id, .. } => client_id,
            Self::ClientCredentials { client_id, .. } => client_id,
        }
    }

    fn can_refresh(&self) -> bool {
        matches!(self, Self::ClientCredentials { .. })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_none_or(|deadline| Instant::now() + TOKEN_EXPIRY_MARGIN < deadline)
    }
}

/// Twitch Helix client.
pub struct TwitchClient {
    http: Client,
    credentials: TwitchCredentials,
    token: Mutex<Option<CachedToken>>,
}

impl TwitchClient {
    pub fn new(http: Client, credentials: TwitchCredentials) -> Self {
        let token = match &credentials {
            TwitchCredentials::AppToken { access_token, .. } => Some(CachedToken {
                value: access_token.clone(),
                expires_at: None,
            }),
            TwitchCredentials::ClientCredentials { .. } => None,
        };

        Self {
            http,
            credentials,
            token: Mutex::new(token),
        }
    }

    /// Fetch the streams that are currently live among `logins`.
    ///
    /// Logins that are offline (or do not exist) are simply absent from the result.
    pub async fn get_streams(&self, logins: &[String]) -> Result<Vec<HelixStream>> {
        let mut streams = Vec::new();
        for chunk in logins.chunks(MAX_LOGINS_PER_REQUEST) {
            let mut query: Vec<(&str, &str)> = chunk
                .iter()
                .map(|login| ("user_login", login.as_str()))
                .collect();
            query.push(("first", "100"));

            let response: HelixResponse<HelixStream> = self.get_helix("/streams", &query).await?;
            streams.extend(response.data);
        }

        debug!(
            requested = logins.len(),
            live = streams.len(),
            "Fetched Twitch stream status"
        );
        Ok(streams)
    }

    /// Fetch user records for `logins`.
    pub async fn get_users(&self, logins: &[String]) -> Result<Vec<HelixUser>> {
        let mut users = Vec::new();
        for chunk in logins.chunks(MAX_LOGINS_PER_REQUEST) {
            let query: Vec<(&str, &str)> =
                chunk.iter().map(|login| ("login", login.as_str())).collect();

            let response: HelixResponse<HelixUser> = self.get_helix("/users", &query).await?;
            users.extend(response.data);
        }
        Ok(users)
    }

    async fn get_helix<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<HelixResponse<T>> {
        let mut refreshed = false;

        loop {
            let token = self.access_token().await?;
            let response = self
                .http
                .get(format!("{HELIX_BASE_URL}{path}"))
                .query(query)
                .header("Client-Id", self.credentials.client_id())
                .bearer_auth(&token)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                if self.credentials.can_refresh() && !refreshed {
                    debug!("Twitch rejected the cached app token, requesting a new one");
                    self.token.lock().take();
                    refreshed = true;
                    continue;
                }
                return Err(PlatformError::auth("Twitch rejected the app access token"));
            }

            if !status.is_success() {
                return Err(error_for_response(response).await);
            }

            return Ok(response.json().await?);
        }
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.token.lock().as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let TwitchCredentials::ClientCredentials {
            client_id,
            client_secret,
        } = &self.credentials
        else {
            return Err(PlatformError::auth("static Twitch app token has expired"));
        };

        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::auth(format!(
                "Twitch refused the client credentials: {body}"
            )));
        }
        if !status.is_success() {
            return Err(error_for_response(response).await);
        }

        let grant: TokenResponse = response.json().await?;
        info!(expires_in = grant.expires_in, "Obtained Twitch app access token");

        let cached = CachedToken {
            value: grant.access_token,
            expires_at: Some(Instant::now() + Duration::from_secs(grant.expires_in)),
        };
        let value = cached.value.clone();
        *self.token.lock() = Some(cached);
        Ok(value)
    }
}
