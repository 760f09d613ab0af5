//! Twitch live-status poller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nerodia_platforms::PlatformError;
use nerodia_platforms::twitch::{TwitchClient, TwitchCredentials};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{StateTracker, StatusEvent, StatusProducer, StreamDetails, StreamStatus};
use crate::config::parse_section;
use crate::registry::{ComponentServices, ComponentSpec};
use crate::{Error, Result};

const THUMBNAIL_WIDTH: u32 = 1280;
const THUMBNAIL_HEIGHT: u32 = 720;

fn default_interval() -> u64 {
    60
}

/// `producers.poller` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollerConfig {
    /// Twitch logins to watch.
    pub streams: Vec<String>,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl PollerConfig {
    /// Parse and validate the section found at `key`.
    pub fn parse(value: &serde_json::Value, key: &str) -> Result<Self> {
        let mut config: Self = parse_section(value, key)?;

        let mut logins: Vec<String> = Vec::with_capacity(config.streams.len());
        for (index, login) in config.streams.iter().enumerate() {
            let login = login.trim().to_lowercase();
            if login.is_empty() {
                return Err(Error::invalid_config(
                    format!("{key}.streams[{index}]"),
                    "stream login is empty",
                ));
            }
            if !logins.contains(&login) {
                logins.push(login);
            }
        }
        if logins.is_empty() {
            return Err(Error::invalid_config(
                format!("{key}.streams"),
                "at least one stream must be tracked",
            ));
        }
        config.streams = logins;

        if config.interval_secs == 0 {
            return Err(Error::invalid_config(
                format!("{key}.interval_secs"),
                "must be at least 1",
            ));
        }
        if config.client_id.trim().is_empty() {
            return Err(Error::invalid_config(
                format!("{key}.client_id"),
                "client id is empty",
            ));
        }
        if config.client_secret.is_some() && config.access_token.is_some() {
            return Err(Error::invalid_config(
                format!("{key}.access_token"),
                "set either client_secret or access_token, not both",
            ));
        }
        if config.client_secret.is_none() && config.access_token.is_none() {
            return Err(Error::invalid_config(
                format!("{key}.client_secret"),
                "either client_secret or access_token is required",
            ));
        }

        Ok(config)
    }

    pub fn credentials(&self) -> TwitchCredentials {
        match (&self.access_token, &self.client_secret) {
            (Some(access_token), _) => TwitchCredentials::AppToken {
                client_id: self.client_id.clone(),
                access_token: access_token.clone(),
            },
            (None, secret) => TwitchCredentials::ClientCredentials {
                client_id: self.client_id.clone(),
                client_secret: secret.clone().unwrap_or_default(),
            },
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Where the poller learns which streams are live.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Details of every live stream among `logins`, keyed by lowercase login.
    /// Logins missing from the map are offline.
    async fn live_streams(&self, logins: &[String]) -> Result<HashMap<String, StreamDetails>>;
}

#[async_trait]
impl StreamSource for TwitchClient {
    async fn live_streams(&self, logins: &[String]) -> Result<HashMap<String, StreamDetails>> {
        let streams = self.get_streams(logins).await?;
        if streams.is_empty() {
            return Ok(HashMap::new());
        }

        let live_logins: Vec<String> = streams.iter().map(|s| s.user_login.to_lowercase()).collect();
        // Avatars only decorate announcements.
        let avatars: HashMap<String, String> = match self.get_users(&live_logins).await {
            Ok(users) => users
                .into_iter()
                .filter(|u| !u.profile_image_url.is_empty())
                .map(|u| (u.login.to_lowercase(), u.profile_image_url))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to fetch Twitch user profiles");
                HashMap::new()
            }
        };

        Ok(streams
            .into_iter()
            .map(|stream| {
                let login = stream.user_login.to_lowercase();
                let thumbnail = stream.thumbnail(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT);
                let details = StreamDetails {
                    display_name: stream.user_name,
                    title: stream.title,
                    game: Some(stream.game_name).filter(|g| !g.is_empty()),
                    viewer_count: stream.viewer_count,
                    thumbnail_url: Some(thumbnail).filter(|t| !t.is_empty()),
                    avatar_url: avatars.get(&login).cloned(),
                    started_at: stream.started_at,
                };
                (login, details)
            })
            .collect())
    }
}

/// Polls a [`StreamSource`] and reports live/offline transitions.
///
/// Every tracked login is part of every snapshot, so a stream ending shows
/// up as an explicit `Live → Offline` change.
pub struct TwitchPoller {
    name: String,
    logins: Vec<String>,
    interval: Duration,
    source: Arc<dyn StreamSource>,
    tracker: StateTracker<StreamStatus>,
}

impl TwitchPoller {
    pub fn new(
        name: impl Into<String>,
        logins: Vec<String>,
        interval: Duration,
        source: Arc<dyn StreamSource>,
    ) -> Self {
        Self {
            name: name.into(),
            logins,
            interval,
            source,
            tracker: StateTracker::new(),
        }
    }

    /// Registry factory.
    pub fn from_spec(spec: &ComponentSpec, services: &ComponentServices) -> Result<Self> {
        let config = PollerConfig::parse(&spec.config, &spec.key)?;
        let client = TwitchClient::new(services.http.clone(), config.credentials());
        Ok(Self::new(
            spec.name.clone(),
            config.streams.clone(),
            config.interval(),
            Arc::new(client),
        ))
    }

    /// Rejected credentials never recover by waiting, so they stop the
    /// pipeline as a configuration error.
    fn poll_error(&self, error: Error) -> Error {
        match error {
            Error::Platform(PlatformError::Auth(reason)) => Error::invalid_config(
                format!("producers.{}", self.name),
                format!("Twitch rejected the credentials: {reason}"),
            ),
            Error::Platform(e) => {
                if !e.is_transient() {
                    warn!(producer = %self.name, error = %e, "Poll failed with a non-retryable error");
                }
                Error::TransientPollFailure(e.to_string())
            }
            e => Error::TransientPollFailure(e.to_string()),
        }
    }
}

#[async_trait]
impl StatusProducer for TwitchPoller {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn detect_changes(&mut self) -> Result<Vec<StatusEvent>> {
        let mut live = self
            .source
            .live_streams(&self.logins)
            .await
            .map_err(|e| self.poll_error(e))?;

        let snapshot: Vec<(String, StreamStatus)> = self
            .logins
            .iter()
            .map(|login| {
                let status = if live.contains_key(login) {
                    StreamStatus::Live
                } else {
                    StreamStatus::Offline
                };
                (login.clone(), status)
            })
            .collect();

        let events: Vec<StatusEvent> = self
            .tracker
            .observe(snapshot)
            .into_iter()
            .map(|(subject, previous, new)| {
                let details = live.remove(&subject);
                let event = StatusEvent::new(subject, previous, new);
                match (new, details) {
                    (StreamStatus::Live, Some(details)) => event.with_details(details),
                    _ => event,
                }
            })
            .collect();

        debug!(
            producer = %self.name,
            tracked = self.logins.len(),
            changes = events.len(),
            "Poll complete"
        );
        Ok(events)
    }
}
