use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

const INSTRUCTION_PREVIEW_CHARS: usize = 120;

/// Show liveness, configuration and the latest memory summary (Owner only)
#[poise::command(slash_command, owners_only)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;

    let data = ctx.data();
    let status = data.store.fetch_status(data.config.bot_status_id).await?;
    let config = data.store.fetch_config().await?.unwrap_or_default();
    let latest = data.store.recent_memories(1).await?;

    let (state, heartbeat) = match &status {
        Some(s) => (
            if s.connected { "🟢 Online" } else { "🔴 Offline" },
            s.last_heartbeat
                .map(|t| format!("<t:{}:R>", t.timestamp()))
                .unwrap_or_else(|| "never".to_string()),
        ),
        None => ("⚪ Unknown", "never".to_string()),
    };

    let channel = match config.allowed_channel_id.as_deref() {
        Some(id) if config.is_channel_restricted() => format!("<#{}>", id),
        _ => "unrestricted".to_string(),
    };

    let summary = latest
        .first()
        .and_then(|record| record.summary.clone())
        .filter(|s| !s.is_empty());
    let summary_field = match &summary {
        Some(s) => format!("{}\n*{} chars*", s, s.chars().count()),
        None => "No memory stored yet.".to_string(),
    };

    let embed = serenity::CreateEmbed::new()
        .title("📡 Bot Status")
        .field("Connection", state, true)
        .field("Last Heartbeat", heartbeat, true)
        .field("Channel", channel, true)
        .field(
            "Instructions",
            format!("`{}`", preview(config.instructions(), INSTRUCTION_PREVIEW_CHARS)),
            false,
        )
        .field("Latest Summary", summary_field, false)
        .color(0x5865F2);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Shut down the bot (Owner only)
#[poise::command(slash_command, owners_only, hide_in_help)]
pub async fn shutdown(ctx: Context<'_>) -> Result<(), Error> {
    info!("Shutdown command received from owner: {}", ctx.author().name);
    ctx.say("👋 Shutting down...").await?;
    ctx.framework().shard_manager().shutdown_all().await;
    Ok(())
}

/// First `max` chars of `text`, with an ellipsis when cut.
fn preview(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 120), "short");
        assert_eq!(preview(&"x".repeat(120), 120), "x".repeat(120));
        assert_eq!(preview(&"y".repeat(121), 120), format!("{}…", "y".repeat(120)));
        assert_eq!(preview("héllo wörld", 5), "héllo…");
    }
}
