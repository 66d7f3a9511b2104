//! Serenity side of the bot: the channel transport and the message event.

use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DISCORD_MESSAGE_LIMIT;
use crate::error::TransportError;
use crate::liveness::ConnectionSignal;
use crate::pipeline::{IncomingMessage, Transport, TurnOutcome, TypingGuard};
use crate::Data;

/// Replies into the channel a message came from.
pub struct ChannelTransport {
    http: Arc<serenity::Http>,
    channel_id: serenity::ChannelId,
}

impl ChannelTransport {
    pub fn new(http: Arc<serenity::Http>, channel_id: serenity::ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, text: &str) -> Result<(), TransportError> {
        for chunk in split_message(text, DISCORD_MESSAGE_LIMIT) {
            self.channel_id.say(&self.http, chunk).await?;
        }
        Ok(())
    }

    fn start_typing(&self) -> TypingGuard {
        Box::new(self.channel_id.start_typing(&self.http))
    }
}

/// Splits `text` into pieces of at most `limit` characters, breaking after
/// the last newline in each window when there is one.
pub fn split_message(text: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        // Byte offset just past the `limit`-th char
        let window_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..window_end];
        let cut = match window.rfind('\n') {
            Some(i) if i > 0 => i + 1,
            _ => window_end,
        };
        chunks.push(&rest[..cut]);
        rest = &rest[cut..];
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}

/// First `Ready`: the heartbeat starts before command registration, and a
/// failed registration leaves the bot running.
pub async fn on_ready<F>(signal: &ConnectionSignal, registration: F)
where
    F: Future<Output = Result<(), serenity::Error>>,
{
    signal.mark_ready();
    if let Err(e) = registration.await {
        warn!("Failed to register slash commands: {}", e);
    }
}

/// Gateway `Message` event: everything not written by a bot goes through
/// the pipeline.
pub async fn handle_message(ctx: &serenity::Context, message: &serenity::Message, data: &Data) {
    if message.author.bot {
        return;
    }

    let incoming = IncomingMessage {
        author_id: message.author.id.to_string(),
        channel_id: message.channel_id.to_string(),
        content: message.content.clone(),
    };
    let transport = ChannelTransport::new(ctx.http.clone(), message.channel_id);

    match data.pipeline.handle(&incoming, &transport).await {
        TurnOutcome::Skipped(reason) => {
            debug!("Ignored message in {}: {:?}", incoming.channel_id, reason)
        }
        outcome => info!(
            "Handled message from {} in {}: {:?}",
            incoming.author_id, incoming.channel_id, outcome
        ),
    }
}
