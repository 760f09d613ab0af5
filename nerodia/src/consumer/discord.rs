//! Discord bot consumer.

use std::sync::Arc;

use async_trait::async_trait;
use nerodia_platforms::discord::CreateMessage;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ChatTransport, CommandHandler, CommandRouter, CommandTable, ConsumerContext, DeliveryLog,
    DiscordTransport, HelpCommand, InboundMessage, NotificationConsumer, StartTime,
    TransportEvent, render_event,
};
use crate::config::parse_section;
use crate::producer::StatusEvent;
use crate::registry::{ComponentServices, ComponentSpec};
use crate::{Error, Result};

fn default_prefix() -> String {
    "!".to_string()
}

/// `consumers.discordbot` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscordBotConfig {
    pub token: String,
    /// Channel that receives announcements.
    #[serde(deserialize_with = "crate::config::ids::id")]
    pub announce_channel: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub announce_offline: bool,
    /// The bot's own user id; resolved through the API when absent.
    #[serde(default, deserialize_with = "crate::config::ids::optional_id")]
    pub user_id: Option<String>,
}

impl DiscordBotConfig {
    pub fn parse(value: &serde_json::Value, key: &str) -> Result<Self> {
        let config: Self = parse_section(value, key)?;

        if config.token.trim().is_empty() {
            return Err(Error::invalid_config(format!("{key}.token"), "token is empty"));
        }
        if config.announce_channel.trim().is_empty() {
            return Err(Error::invalid_config(
                format!("{key}.announce_channel"),
                "channel id is empty",
            ));
        }
        if config.prefix.trim().is_empty() {
            return Err(Error::invalid_config(
                format!("{key}.prefix"),
                "prefix is empty",
            ));
        }
        Ok(config)
    }
}

/// Announces stream changes in a Discord channel and answers chat commands.
pub struct DiscordBotConsumer {
    name: String,
    config: DiscordBotConfig,
    transport: Arc<dyn ChatTransport>,
    router: Arc<CommandRouter>,
    deliveries: DeliveryLog,
    started_at: StartTime,
    listener: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl DiscordBotConsumer {
    pub fn new(
        name: impl Into<String>,
        config: DiscordBotConfig,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        let router = CommandRouter::new(config.prefix.clone(), config.user_id.clone());
        Self {
            name: name.into(),
            config,
            transport,
            router: Arc::new(router),
            deliveries: DeliveryLog::new(),
            started_at: StartTime::new(),
            listener: Mutex::new(None),
        }
    }

    /// Registry factory.
    pub fn from_spec(spec: &ComponentSpec, services: &ComponentServices) -> Result<Self> {
        let config = DiscordBotConfig::parse(&spec.config, &spec.key)?;
        let transport = DiscordTransport::new(services.http.clone(), config.token.clone());
        Ok(Self::new(spec.name.clone(), config, Arc::new(transport)))
    }

    pub fn deliveries(&self) -> &DeliveryLog {
        &self.deliveries
    }

    async fn listen(
        name: String,
        router: Arc<CommandRouter>,
        transport: Arc<dyn ChatTransport>,
        mut events: tokio::sync::mpsc::Receiver<TransportEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                None => {
                    warn!(consumer = %name, "Chat transport closed, commands are unavailable");
                    break;
                }
                Some(TransportEvent::Ready { user_id }) => {
                    debug!(consumer = %name, user_id = %user_id, "Chat session ready");
                    router.set_bot_user_id(user_id);
                }
                Some(TransportEvent::Message(message)) => {
                    // A slow command must not hold up the ones behind it.
                    let name = name.clone();
                    let router = router.clone();
                    let transport = transport.clone();
                    tokio::spawn(async move {
                        reply(&name, &router, transport.as_ref(), &message).await;
                    });
                }
            }
        }
        debug!(consumer = %name, "Command listener stopped");
    }
}

async fn reply(
    name: &str,
    router: &CommandRouter,
    transport: &dyn ChatTransport,
    message: &InboundMessage,
) {
    match router.route(message).await {
        Ok(Some(text)) => {
            if let Err(e) = transport
                .send(&message.channel_id, &CreateMessage::text(text))
                .await
            {
                warn!(consumer = %name, error = %e, "Failed to send command reply");
            }
        }
        Ok(None) => {}
        Err(e) => warn!(consumer = %name, error = %e, "Command failed"),
    }
}

#[async_trait]
impl NotificationConsumer for DiscordBotConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> ConsumerContext {
        ConsumerContext {
            name: self.name.clone(),
            deliveries: self.deliveries.clone(),
            started_at: self.started_at.clone(),
        }
    }

    fn builtin_commands(&self) -> Vec<(String, Arc<dyn CommandHandler>)> {
        vec![("help".to_string(), Arc::new(HelpCommand) as Arc<dyn CommandHandler>)]
    }

    fn install_commands(&self, table: CommandTable) -> Result<()> {
        debug!(consumer = %self.name, commands = table.len(), "Installing command table");
        self.router.install(table)
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        if self.router.bot_user_id().is_none() {
            match self.transport.current_user_id().await {
                Ok(user_id) => self.router.set_bot_user_id(user_id),
                Err(e) => warn!(
                    consumer = %self.name,
                    error = %e,
                    "Could not resolve the bot user id, mentions work once the session is ready"
                ),
            }
        }

        let token = shutdown.child_token();
        let events = self.transport.subscribe(token.clone()).await?;
        self.started_at.mark();
        let handle = tokio::spawn(Self::listen(
            self.name.clone(),
            self.router.clone(),
            self.transport.clone(),
            events,
            token.clone(),
        ));

        if let Some((previous, _)) = self.listener.lock().replace((token, handle)) {
            previous.cancel();
        }

        info!(
            consumer = %self.name,
            channel = %self.config.announce_channel,
            prefix = %self.router.prefix(),
            "Discord bot started"
        );
        Ok(())
    }

    async fn on_event(&self, event: &StatusEvent) -> Result<()> {
        if self.deliveries.is_delivered(event) {
            debug!(
                consumer = %self.name,
                subject = %event.subject,
                state = %event.new_state,
                "Already announced, skipping"
            );
            return Ok(());
        }

        if let Some(message) = render_event(event, self.config.announce_offline) {
            self.transport
                .send(&self.config.announce_channel, &message)
                .await
                .map_err(|e| Error::delivery(&self.name, e.to_string()))?;
            info!(
                consumer = %self.name,
                subject = %event.subject,
                state = %event.new_state,
                "Announced status change"
            );
        }

        self.deliveries.record(event);
        Ok(())
    }

    async fn on_command(&self, message: &InboundMessage) -> Result<Option<String>> {
        self.router.route(message).await
    }

    async fn shutdown(&self) {
        let listener = self.listener.lock().take();
        if let Some((token, handle)) = listener {
            token.cancel();
            let _ = handle.await;
        }
        debug!(consumer = %self.name, "Discord bot stopped");
    }
}
