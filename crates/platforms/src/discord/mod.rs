mod gateway;
mod models;
mod rest;

pub use gateway::{DiscordGateway, GatewayConfig, GatewayEvent, intents};
pub use models::{
    CreateMessage, Embed, EmbedField, EmbedFooter, EmbedMedia, GatewayPayload, Message, User,
};
pub use rest::DiscordRest;
