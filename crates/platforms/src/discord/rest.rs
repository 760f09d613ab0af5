//! Discord REST client.
//!
//! Rate limits are reported, never waited out: a 429 surfaces as
//! [`PlatformError::RateLimited`] carrying the server's back-off hint.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::models::{CreateMessage, User};
use crate::error::{PlatformError, Result};
use crate::http::error_for_response;

const API_BASE_URL: &str = "https://discord.com/api/v10";

/// Discord REST client authenticated as a bot.
#[derive(Clone)]
pub struct DiscordRest {
    http: Client,
    token: String,
}

impl DiscordRest {
    pub fn new(http: Client, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
        }
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Post a message to a channel.
    pub async fn create_message(&self, channel_id: &str, message: &CreateMessage) -> Result<()> {
        let response = self
            .http
            .post(format!("{API_BASE_URL}/channels/{channel_id}/messages"))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(channel_id, "Discord message sent");
            return Ok(());
        }

        let error = self.map_failure(response).await;
        warn!(channel_id, error = %error, "Discord message rejected");
        Err(error)
    }

    /// Resolve the bot's own account.
    pub async fn get_current_user(&self) -> Result<User> {
        self.get_json("/users/@me").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(format!("{API_BASE_URL}{path}"))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.map_failure(response).await);
        }
        Ok(response.json().await?)
    }

    async fn map_failure(&self, response: reqwest::Response) -> PlatformError {
        match response.status() {
            StatusCode::UNAUTHORIZED => PlatformError::auth("Discord rejected the bot token"),
            _ => error_for_response(response).await,
        }
    }
}
