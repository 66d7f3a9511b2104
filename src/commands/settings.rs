use crate::store::ConfigUpdate;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

/// Manage the bot configuration row (Owner only)
#[poise::command(slash_command, subcommands("instructions", "channel"), owners_only)]
pub async fn config(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Replace the system instructions used for every reply
#[poise::command(slash_command, owners_only)]
pub async fn instructions(
    ctx: Context<'_>,
    #[description = "New system instructions"] text: String,
) -> Result<(), Error> {
    let text = text.trim();
    if text.is_empty() {
        ctx.say("❌ Instructions cannot be empty.").await?;
        return Ok(());
    }

    ctx.defer_ephemeral().await?;
    ctx.data()
        .store
        .update_config(ConfigUpdate {
            system_instructions: Some(text.to_string()),
            ..Default::default()
        })
        .await?;

    info!("System instructions updated by {}", ctx.author().name);
    ctx.say(format!(
        "✅ Updated system instructions ({} chars).",
        text.chars().count()
    ))
    .await?;
    Ok(())
}

/// Restrict replies to one channel
#[poise::command(slash_command, owners_only)]
pub async fn channel(
    ctx: Context<'_>,
    #[description = "Channel to reply in (defaults to this one)"]
    #[channel_types("Text")]
    channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let channel_id = channel.map(|c| c.id).unwrap_or_else(|| ctx.channel_id());

    ctx.defer_ephemeral().await?;
    ctx.data()
        .store
        .update_config(ConfigUpdate {
            allowed_channel_id: Some(channel_id.to_string()),
            ..Default::default()
        })
        .await?;

    info!("Allowed channel set to {} by {}", channel_id, ctx.author().name);
    ctx.say(format!("✅ Now replying only in <#{}>.", channel_id))
        .await?;
    Ok(())
}
