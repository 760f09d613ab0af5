//! Status-change events.
//!
//! Events are emitted by the active producer and fanned out by the
//! dispatcher to every enabled consumer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed state of a watched stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Offline,
    Live,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("offline"),
            Self::Live => f.write_str("live"),
        }
    }
}

/// What the platform reported about a live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDetails {
    pub display_name: String,
    pub title: String,
    pub game: Option<String>,
    pub viewer_count: u64,
    pub thumbnail_url: Option<String>,
    pub avatar_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

/// A detected state transition of one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Identifier of the watched entity, e.g. a channel login.
    pub subject: String,
    /// `None` on the first observation of the subject.
    pub previous_state: Option<StreamStatus>,
    pub new_state: StreamStatus,
    pub details: Option<StreamDetails>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(
        subject: impl Into<String>,
        previous_state: Option<StreamStatus>,
        new_state: StreamStatus,
    ) -> Self {
        Self {
            subject: subject.into(),
            previous_state,
            new_state,
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: StreamDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Identity used for de-duplication: `(subject, new_state)`.
    pub fn dedup_key(&self) -> (&str, StreamStatus) {
        (&self.subject, self.new_state)
    }

    /// Name to show to humans; falls back to the subject.
    pub fn display_name(&self) -> &str {
        self.details
            .as_ref()
            .map(|d| d.display_name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.subject)
    }

    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match (self.previous_state, self.new_state) {
            (_, StreamStatus::Live) => format!("{} is now live", self.display_name()),
            (Some(StreamStatus::Live), StreamStatus::Offline) => {
                format!("{} went offline", self.display_name())
            }
            (_, StreamStatus::Offline) => format!("{} is offline", self.display_name()),
        }
    }
}
