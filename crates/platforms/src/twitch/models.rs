use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope of every Helix collection response.
#[derive(Debug, Clone, Deserialize)]
pub struct HelixResponse<T> {
    pub data: Vec<T>,
}

/// A live stream as reported by `GET /helix/streams`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelixStream {
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewer_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    /// Template URL containing `{width}` and `{height}` placeholders.
    #[serde(default)]
    pub thumbnail_url: String,
}

impl HelixStream {
    /// Resolve the thumbnail template to a concrete size.
    pub fn thumbnail(&self, width: u32, height: u32) -> String {
        self.thumbnail_url
            .replace("{width}", &width.to_string())
            .replace("{height}", &height.to_string())
    }
}

/// A user record as reported by `GET /helix/users`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default)]
    pub profile_image_url: String,
}

/// Response of the client-credentials grant.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}
