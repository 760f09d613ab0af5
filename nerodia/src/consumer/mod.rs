//! Notification consumers.
//!
//! A consumer receives every status event from the dispatcher and, on a
//! separate path driven by its chat transport, answers user commands.

mod commands;
mod delivery;
mod discord;
mod render;
mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

pub use commands::{
    CommandContext, CommandHandler, CommandRouter, CommandTable, HelpCommand, parse_invocation,
};
pub use delivery::DeliveryLog;
pub use discord::{DiscordBotConfig, DiscordBotConsumer};
pub use render::{EMBED_COLOUR, render_event};
pub use transport::{ChatTransport, DiscordTransport, InboundMessage, TransportEvent};

use crate::Result;
use crate::producer::StatusEvent;

/// What a consumer exposes to the modules bound to it.
#[derive(Debug, Clone)]
pub struct ConsumerContext {
    pub name: String,
    pub deliveries: DeliveryLog,
    pub started_at: StartTime,
}

/// When a consumer was started, shared with the modules bound to it.
///
/// Modules attach before `start`, so they hold this handle rather than a
/// copy of the timestamp.
#[derive(Debug, Clone)]
pub struct StartTime(Arc<RwLock<DateTime<Utc>>>);

impl StartTime {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self(Arc::new(RwLock::new(time)))
    }

    /// Restart the clock.
    pub fn mark(&self) {
        *self.0.write() = Utc::now();
    }

    pub fn get(&self) -> DateTime<Utc> {
        *self.0.read()
    }
}

impl Default for StartTime {
    fn default() -> Self {
        Self::new()
    }
}

/// A component that reacts to status events.
#[async_trait]
pub trait NotificationConsumer: Send + Sync {
    fn name(&self) -> &str;

    fn context(&self) -> ConsumerContext;

    /// Commands the consumer ships with, before any module is attached.
    fn builtin_commands(&self) -> Vec<(String, Arc<dyn CommandHandler>)> {
        Vec::new()
    }

    /// Receive the merged command table. Called once, before [`start`](Self::start).
    fn install_commands(&self, table: CommandTable) -> Result<()>;

    /// Connect to the outside world and begin accepting commands.
    async fn start(&self, _shutdown: CancellationToken) -> Result<()> {
        Ok(())
    }

    /// Deliver one event. Called at most once per event; failures are not retried.
    async fn on_event(&self, event: &StatusEvent) -> Result<()>;

    /// Route one inbound message, returning the reply if it was a command.
    async fn on_command(&self, _message: &InboundMessage) -> Result<Option<String>> {
        Ok(None)
    }

    async fn shutdown(&self) {}
}
