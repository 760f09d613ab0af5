//! Chat transports used by the bot consumer.

use async_trait::async_trait;
use nerodia_platforms::discord::{
    CreateMessage, DiscordGateway, DiscordRest, GatewayEvent, Message, intents,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Result;

/// A chat message addressed to the bot, independent of the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
}

impl From<Message> for InboundMessage {
    fn from(message: Message) -> Self {
        Self {
            channel_id: message.channel_id,
            guild_id: message.guild_id,
            author_id: message.author.id,
            author_name: message.author.username,
            content: message.content,
        }
    }
}

/// Events produced by [`ChatTransport::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The session is up; carries the bot's own user id.
    Ready { user_id: String },
    Message(InboundMessage),
}

/// Sends messages to and receives messages from a chat service.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, channel_id: &str, message: &CreateMessage) -> Result<()>;

    /// Start receiving messages. The stream ends when `shutdown` is cancelled.
    async fn subscribe(&self, shutdown: CancellationToken) -> Result<mpsc::Receiver<TransportEvent>>;

    /// The bot's own user id, used to recognize mentions.
    async fn current_user_id(&self) -> Result<String>;
}

/// Discord over REST (sending) and the gateway (receiving).
pub struct DiscordTransport {
    rest: DiscordRest,
    token: String,
}

impl DiscordTransport {
    pub fn new(http: reqwest::Client, token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            rest: DiscordRest::new(http, token.clone()),
            token,
        }
    }
}

#[async_trait]
impl ChatTransport for DiscordTransport {
    async fn send(&self, channel_id: &str, message: &CreateMessage) -> Result<()> {
        self.rest.create_message(channel_id, message).await?;
        Ok(())
    }

    async fn subscribe(&self, shutdown: CancellationToken) -> Result<mpsc::Receiver<TransportEvent>> {
        let (mut gateway_rx, _task) =
            DiscordGateway::new(self.token.clone(), intents::COMMANDS).spawn(shutdown);
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            while let Some(event) = gateway_rx.recv().await {
                let event = match event {
                    GatewayEvent::Ready { user_id } => TransportEvent::Ready { user_id },
                    GatewayEvent::MessageCreate(message) => {
                        TransportEvent::Message(message.into())
                    }
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("Discord transport stream closed");
        });

        Ok(rx)
    }

    async fn current_user_id(&self) -> Result<String> {
        Ok(self.rest.get_current_user().await?.id)
    }
}
