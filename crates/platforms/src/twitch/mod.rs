mod client;
mod models;

pub use client::{TwitchClient, TwitchCredentials};
pub use models::{HelixResponse, HelixStream, HelixUser, TokenResponse};

/// Public channel URL of a Twitch login.
pub fn channel_url(login: &str) -> String {
    format!("https://twitch.tv/{login}")
}
