//! Platform clients for the nerodia notification pipeline.
//!
//! - [`twitch`]: Helix API client used to poll live status.
//! - [`discord`]: REST client for sending messages and a gateway client
//!   for receiving them.

pub mod discord;
pub mod error;
pub mod http;
pub mod twitch;

pub use error::{PlatformError, Result};
