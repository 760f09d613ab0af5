use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Settings of the poll/dispatch loop (`dispatcher` section).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Upper bound for one `detect_changes` call.
    pub poll_timeout_secs: u64,
    /// Upper bound for one consumer's `on_event` call.
    pub delivery_timeout_secs: u64,
    /// Consecutive failed polls after which the dispatcher gives up.
    pub escalation_threshold: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 15,
            delivery_timeout_secs: 15,
            escalation_threshold: 5,
        }
    }
}

impl DispatcherConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.escalation_threshold == 0 {
            return Err(Error::invalid_config(
                "dispatcher.escalation_threshold",
                "must be at least 1",
            ));
        }
        if self.poll_timeout_secs == 0 {
            return Err(Error::invalid_config(
                "dispatcher.poll_timeout_secs",
                "must be at least 1",
            ));
        }
        if self.delivery_timeout_secs == 0 {
            return Err(Error::invalid_config(
                "dispatcher.delivery_timeout_secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
