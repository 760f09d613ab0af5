//! Control handle for a spawned dispatcher.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::DispatcherState;
use crate::{Error, Result};

/// Returned by [`Dispatcher::start`](super::Dispatcher::start).
pub struct DispatcherHandle {
    shutdown: CancellationToken,
    state: watch::Receiver<DispatcherState>,
    task: JoinHandle<Result<()>>,
}

impl DispatcherHandle {
    pub(super) fn new(
        shutdown: CancellationToken,
        state: watch::Receiver<DispatcherState>,
        task: JoinHandle<Result<()>>,
    ) -> Self {
        Self {
            shutdown,
            state,
            task,
        }
    }

    /// Request a stop. The loop exits at its next idle point.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn watch_state(&self) -> watch::Receiver<DispatcherState> {
        self.state.clone()
    }

    /// Wait for the loop to exit and return its outcome.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Other(format!("dispatcher task failed: {e}"))),
        }
    }
}
