//! Status producers.
//!
//! Exactly one producer is active at a time. The dispatcher calls
//! [`StatusProducer::detect_changes`] once per interval and fans the returned
//! events out to the consumers.

mod event;
mod poller;
mod tracker;

use std::time::Duration;

use async_trait::async_trait;

pub use event::{StatusEvent, StreamDetails, StreamStatus};
pub use poller::{PollerConfig, StreamSource, TwitchPoller};
pub use tracker::StateTracker;

use crate::Result;

/// A component that detects state changes in an external service.
#[async_trait]
pub trait StatusProducer: Send + Sync {
    fn name(&self) -> &str;

    /// How often the dispatcher should poll.
    fn interval(&self) -> Duration;

    /// Query the external service and return one event per subject whose
    /// state changed since the last successful call.
    ///
    /// A failed call must leave the known state untouched so the next call
    /// can pick up where the last successful one stopped.
    async fn detect_changes(&mut self) -> Result<Vec<StatusEvent>>;
}
