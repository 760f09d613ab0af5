//! Application-wide error types.

use nerodia_platforms::PlatformError;
use thiserror::Error;

use crate::registry::ComponentKind;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration at `{key}`: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("Unknown {kind} `{name}`: no such component is registered")]
    UnknownComponent { kind: ComponentKind, name: String },

    #[error("Command `{command}` is registered by both {first} and {second}")]
    CommandConflict {
        command: String,
        first: String,
        second: String,
    },

    #[error("Poll failed: {0}")]
    TransientPollFailure(String),

    #[error("Producer failed {failures} consecutive polls, last error: {last_error}")]
    PollEscalationFailure { failures: u32, last_error: String },

    #[error("Consumer `{consumer}` failed to deliver: {reason}")]
    ConsumerDeliveryFailure { consumer: String, reason: String },

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn invalid_config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_component(kind: ComponentKind, name: impl Into<String>) -> Self {
        Self::UnknownComponent {
            kind,
            name: name.into(),
        }
    }

    pub fn delivery(consumer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConsumerDeliveryFailure {
            consumer: consumer.into(),
            reason: reason.into(),
        }
    }

    /// Fatal errors abort startup or stop the dispatcher; everything else is contained.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::UnknownComponent { .. }
                | Self::CommandConflict { .. }
                | Self::PollEscalationFailure { .. }
        )
    }
}
