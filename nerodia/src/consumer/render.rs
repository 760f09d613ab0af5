//! Discord rendering of status events.

use nerodia_platforms::discord::{CreateMessage, Embed, EmbedField, EmbedFooter, EmbedMedia};
use nerodia_platforms::twitch::channel_url;

use crate::producer::{StatusEvent, StreamStatus};

/// Twitch purple.
pub const EMBED_COLOUR: u32 = 0x722AA4;

/// Build the announcement for `event`, or `None` when it should stay silent.
pub fn render_event(event: &StatusEvent, announce_offline: bool) -> Option<CreateMessage> {
    match event.new_state {
        StreamStatus::Live => Some(CreateMessage::embed(live_embed(event))),
        StreamStatus::Offline if announce_offline => {
            Some(CreateMessage::text(format!("{}.", event.description())))
        }
        StreamStatus::Offline => None,
    }
}

fn live_embed(event: &StatusEvent) -> Embed {
    let url = channel_url(&event.subject);
    let name = event.display_name();

    let mut embed = Embed {
        title: Some(format!("{name} is now live!")),
        url: Some(url.clone()),
        description: Some(url.clone()),
        color: Some(EMBED_COLOUR),
        timestamp: Some(event.timestamp.to_rfc3339()),
        footer: Some(EmbedFooter {
            text: "Twitch".to_string(),
        }),
        ..Default::default()
    };

    let Some(details) = &event.details else {
        return embed;
    };

    if !details.title.is_empty() {
        embed.description = Some(format!("{url}\n\n*{}*", details.title));
    }
    if let Some(started_at) = details.started_at {
        embed.timestamp = Some(started_at.to_rfc3339());
    }
    embed.image = details
        .thumbnail_url
        .clone()
        .map(|url| EmbedMedia { url });
    embed.thumbnail = details.avatar_url.clone().map(|url| EmbedMedia { url });

    if let Some(game) = &details.game {
        embed.fields.push(EmbedField {
            name: "Playing".to_string(),
            value: game.clone(),
            inline: true,
        });
    }
    embed.fields.push(EmbedField {
        name: "Viewers".to_string(),
        value: details.viewer_count.to_string(),
        inline: true,
    });

    embed
}
