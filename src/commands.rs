use crate::moderation::{BotBanStatus, BotWarnOutcome, ModerationError, ModerationResult, WarnOutcome};
use crate::{COMMAND_TARGET, Context, Error};
use poise::command;
use poise::serenity_prelude as serenity;
use std::time::Duration;
use tracing::warn;

/// All commands, in registration order
#[must_use]
pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![
        mute(),
        unmute(),
        mutes(),
        tempban(),
        unban(),
        tempbans(),
        warn(),
        delwarn(),
        warns(),
        kick(),
        autospam(),
        botban(),
        botunban(),
        bottempban(),
        botwarn(),
        botdelwarn(),
    ]
}

/// Mute a member; their messages are deleted until the mute expires
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to mute"] user: serenity::User,
    #[description = "Duration in seconds"]
    #[min = 1]
    seconds: u64,
) -> Result<(), Error> {
    let scope = scope_id(ctx)?;
    let result = ctx
        .data()
        .scheduler
        .mute(&scope, &user.id.to_string(), Duration::from_secs(seconds))
        .await;
    reply(ctx, result, |_| {
        format!("🔇 {} is muted for {}.", user.name, format_duration(Duration::from_secs(seconds)))
    })
    .await
}

/// Lift a mute early
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Member to unmute"] user: serenity::User,
) -> Result<(), Error> {
    let scope = scope_id(ctx)?;
    let result = ctx.data().scheduler.unmute(&scope, &user.id.to_string()).await;
    reply(ctx, result, |_| format!("🔊 {} is no longer muted.", user.name)).await
}

/// List active mutes in this server
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn mutes(ctx: Context<'_>) -> Result<(), Error> {
    let scope = scope_id(ctx)?;
    let active = ctx.data().scheduler.active_mutes(&scope).await;
    if active.is_empty() {
        ctx.say("Nobody is muted.").await?;
        return Ok(());
    }

    let lines: Vec<String> = active
        .iter()
        .map(|m| format!("• <@{}>: {} left", m.entry.subject_id, format_duration(m.remaining)))
        .collect();
    ctx.say(format!("**Active mutes**\n{}", lines.join("\n"))).await?;
    Ok(())
}

/// Ban a member and let them back in after a number of minutes
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "BAN_MEMBERS"
)]
pub async fn tempban(
    ctx: Context<'_>,
    #[description = "Member to ban"] user: serenity::User,
    #[description = "Duration in minutes"]
    #[min = 1]
    minutes: u64,
) -> Result<(), Error> {
    let scope = scope_id(ctx)?;
    let duration = Duration::from_secs(minutes.saturating_mul(60));
    let result = ctx
        .data()
        .scheduler
        .tempban(&scope, &user.id.to_string(), duration)
        .await;
    reply(ctx, result, |_| {
        format!("⛔ {} is banned for {}.", user.name, format_duration(duration))
    })
    .await
}

/// Drop a tempban early; the ban itself must be lifted separately
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "BAN_MEMBERS"
)]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "Banned user"] user: serenity::User,
) -> Result<(), Error> {
    let scope = scope_id(ctx)?;
    let result = ctx.data().scheduler.unban(&scope, &user.id.to_string()).await;
    reply(ctx, result, |_| {
        format!("✅ Tempban for {} cancelled. They stay banned until unbanned manually.", user.name)
    })
    .await
}

/// List tempbans in this server, including failed restorations
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "BAN_MEMBERS"
)]
pub async fn tempbans(ctx: Context<'_>) -> Result<(), Error> {
    let scope = scope_id(ctx)?;
    let active = ctx.data().scheduler.active_tempbans(&scope).await;
    if active.is_empty() {
        ctx.say("No tempbans.").await?;
        return Ok(());
    }

    let lines: Vec<String> = active
        .iter()
        .map(|t| {
            let status = if t.scheduled {
                format!("{} left", format_duration(t.remaining))
            } else {
                format!("restore failed after {} attempts", t.entry.attempts)
            };
            format!("• <@{}>: {status}", t.entry.subject_id)
        })
        .collect();
    ctx.say(format!("**Tempbans**\n{}", lines.join("\n"))).await?;
    Ok(())
}

/// Warn a member; reaching the limit kicks them
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "KICK_MEMBERS"
)]
pub async fn warn(
    ctx: Context<'_>,
    #[description = "Member to warn"] user: serenity::User,
) -> Result<(), Error> {
    let scope = scope_id(ctx)?;
    let result = ctx.data().scheduler.warn(&scope, &user.id.to_string()).await;
    reply(ctx, result, |outcome| describe_warn(&user.name, &outcome)).await
}

/// Clear a member's warns
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "KICK_MEMBERS"
)]
pub async fn delwarn(
    ctx: Context<'_>,
    #[description = "Member whose warns to clear"] user: serenity::User,
) -> Result<(), Error> {
    let scope = scope_id(ctx)?;
    let result = ctx.data().scheduler.clear_warns(&scope, &user.id.to_string()).await;
    reply(ctx, result, |previous| {
        format!("🧹 Cleared {previous} warn(s) for {}.", user.name)
    })
    .await
}

/// List warn counts in this server
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "KICK_MEMBERS"
)]
pub async fn warns(ctx: Context<'_>) -> Result<(), Error> {
    let scope = scope_id(ctx)?;
    let counts = ctx.data().scheduler.warn_counts(&scope).await;
    if counts.is_empty() {
        ctx.say("No warns.").await?;
        return Ok(());
    }

    let threshold = ctx.data().scheduler.policy().warn_threshold;
    let lines: Vec<String> = counts
        .iter()
        .map(|(subject, count)| format!("• <@{subject}>: {count}/{threshold}"))
        .collect();
    ctx.say(format!("**Warns**\n{}", lines.join("\n"))).await?;
    Ok(())
}

/// Kick a member and reset their warns
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "KICK_MEMBERS"
)]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Member to kick"] user: serenity::User,
) -> Result<(), Error> {
    let scope = scope_id(ctx)?;
    let result = ctx.data().scheduler.kick(&scope, &user.id.to_string()).await;
    reply(ctx, result, |()| format!("👢 {} was kicked.", user.name)).await
}

/// Turn automatic spam warns on or off for this server
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn autospam(
    ctx: Context<'_>,
    #[description = "Enable automatic spam warns"] enabled: Option<bool>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;
    let Some(enabled) = enabled else {
        let current = ctx.data().guild_config(guild_id).autospam;
        ctx.say(format!("Autospam is currently {}.", on_off(current))).await?;
        return Ok(());
    };

    ctx.data()
        .update_guild_config(guild_id, |config| config.autospam = enabled)
        .await?;
    if !enabled {
        ctx.data().spam.forget_scope(&guild_id.to_string());
    }
    ctx.say(format!("✅ Autospam is now {}.", on_off(enabled))).await?;
    Ok(())
}

/// Permanently ban a user from bot commands
#[command(prefix_command, slash_command, check = "bot_moderator_check")]
pub async fn botban(
    ctx: Context<'_>,
    #[description = "User to ban from the bot"] user: serenity::User,
) -> Result<(), Error> {
    let result = ctx.data().scheduler.bot_ban(&user.id.to_string()).await;
    reply(ctx, result, |()| format!("🚫 {} may no longer use this bot.", user.name)).await
}

/// Lift a permanent or temporary bot ban
#[command(prefix_command, slash_command, check = "bot_moderator_check")]
pub async fn botunban(
    ctx: Context<'_>,
    #[description = "User to unban from the bot"] user: serenity::User,
) -> Result<(), Error> {
    let subject = user.id.to_string();
    let scheduler = &ctx.data().scheduler;
    let result = match scheduler.bot_ban_status(&subject).await? {
        BotBanStatus::Permanent => scheduler.bot_unban_permanent(&subject).await,
        BotBanStatus::Temporary { .. } => scheduler.bot_unban(&subject).await.map(|_| ()),
        BotBanStatus::None => Err(ModerationError::NotFound(format!("{subject} is not banned from the bot"))),
    };
    reply(ctx, result, |()| format!("✅ {} may use this bot again.", user.name)).await
}

/// Suspend a user from bot commands for a number of minutes
#[command(prefix_command, slash_command, check = "bot_moderator_check")]
pub async fn bottempban(
    ctx: Context<'_>,
    #[description = "User to suspend"] user: serenity::User,
    #[description = "Duration in minutes"]
    #[min = 1]
    minutes: u64,
) -> Result<(), Error> {
    let duration = Duration::from_secs(minutes.saturating_mul(60));
    let result = ctx
        .data()
        .scheduler
        .bot_tempban(&user.id.to_string(), duration)
        .await;
    reply(ctx, result, |_| {
        format!("⏳ {} may not use this bot for {}.", user.name, format_duration(duration))
    })
    .await
}

/// Warn a user at bot level; reaching the limit suspends them
#[command(prefix_command, slash_command, check = "bot_moderator_check")]
pub async fn botwarn(
    ctx: Context<'_>,
    #[description = "User to warn"] user: serenity::User,
) -> Result<(), Error> {
    let result = ctx.data().scheduler.bot_warn(&user.id.to_string()).await;
    reply(ctx, result, |outcome| describe_bot_warn(&user.name, &outcome)).await
}

/// Clear a user's bot-level warns
#[command(prefix_command, slash_command, check = "bot_moderator_check")]
pub async fn botdelwarn(
    ctx: Context<'_>,
    #[description = "User whose bot warns to clear"] user: serenity::User,
) -> Result<(), Error> {
    let result = ctx.data().scheduler.bot_clear_warns(&user.id.to_string()).await;
    reply(ctx, result, |previous| {
        format!("🧹 Cleared {previous} bot warn(s) for {}.", user.name)
    })
    .await
}

/// Only owners and moderators from the config may moderate bot usage
async fn bot_moderator_check(ctx: Context<'_>) -> Result<bool, Error> {
    let allowed = ctx.data().is_bot_moderator(ctx.author().id);
    if !allowed {
        ctx.say("🛑 You are not allowed to do that.").await?;
    }
    Ok(allowed)
}

/// Framework-wide check: users banned from the bot cannot run anything
///
/// # Errors
/// Returns an error if the ban status cannot be read
pub async fn bot_ban_check(ctx: Context<'_>) -> Result<bool, Error> {
    match ctx.data().scheduler.bot_ban_status(&ctx.author().id.to_string()).await? {
        BotBanStatus::None => Ok(true),
        BotBanStatus::Permanent => {
            ctx.say("🚫 You are banned from using this bot.").await?;
            Ok(false)
        }
        BotBanStatus::Temporary { expires_at } => {
            let remaining_ms = expires_at - ctx.data().scheduler.now_millis();
            let remaining = Duration::from_millis(u64::try_from(remaining_ms).unwrap_or(0));
            ctx.say(format!("⏳ You may use this bot again in {}.", format_duration(remaining)))
                .await?;
            Ok(false)
        }
    }
}

fn scope_id(ctx: Context<'_>) -> Result<String, Error> {
    ctx.guild_id()
        .map(|id| id.to_string())
        .ok_or_else(|| "This command only works in servers".into())
}

/// Reply with the success text, or explain an expected failure
///
/// Storage and other unexpected errors go to the framework error handler.
async fn reply<T>(
    ctx: Context<'_>,
    result: ModerationResult<T>,
    success: impl FnOnce(T) -> String,
) -> Result<(), Error> {
    match result {
        Ok(value) => {
            ctx.say(success(value)).await?;
            Ok(())
        }
        Err(e) => match user_message(&e) {
            Some(message) => {
                warn!(
                    target: COMMAND_TARGET,
                    command = %ctx.command().qualified_name,
                    reason = e.reason(),
                    error = %e,
                    "Moderation command rejected"
                );
                ctx.say(message).await?;
                Ok(())
            }
            None => Err(e.into()),
        },
    }
}

/// User-facing text for rejections the caller can act on
fn user_message(error: &ModerationError) -> Option<String> {
    match error {
        ModerationError::NotFound(_) => Some("❌ Nothing to lift for that user.".to_string()),
        ModerationError::AlreadyRestricted(_) => Some("⚠️ That user is already restricted.".to_string()),
        ModerationError::ExternalActionFailed(detail) => Some(format!(
            "❌ Discord rejected the action. Check my permissions and role position. ({detail})"
        )),
        ModerationError::Storage(_) | ModerationError::Serialization(_) | ModerationError::Other(_) => None,
    }
}

fn describe_warn(name: &str, outcome: &WarnOutcome) -> String {
    match outcome {
        WarnOutcome::Recorded { count, threshold } => format!("⚠️ {name} was warned ({count}/{threshold})."),
        WarnOutcome::Escalated { count } => {
            format!("❌ {name} reached {count} warns and was kicked.")
        }
        WarnOutcome::EscalationFailed { count, .. } => {
            format!("⚠️ {name} reached {count} warns but could not be kicked. Check my permissions.")
        }
    }
}

fn describe_bot_warn(name: &str, outcome: &BotWarnOutcome) -> String {
    match outcome {
        BotWarnOutcome::Recorded { count, threshold } => {
            format!("⚠️ {name} received a bot warn ({count}/{threshold}).")
        }
        BotWarnOutcome::Suspended { expires_at } => {
            let until = chrono::DateTime::from_timestamp_millis(*expires_at)
                .map_or_else(|| expires_at.to_string(), |t| t.format("%Y-%m-%d %H:%M UTC").to_string());
            format!("⛔ {name} reached the bot warn limit and is suspended until {until}.")
        }
        BotWarnOutcome::AlreadySuspended => {
            format!("⛔ {name} reached the bot warn limit and is already suspended.")
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

/// Compact human-readable duration, e.g. `1h 5m`
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (days, hours, minutes, seconds) = (total / 86_400, total / 3600 % 24, total / 60 % 60, total % 60);

    let parts: Vec<String> = [(days, "d"), (hours, "h"), (minutes, "m"), (seconds, "s")]
        .into_iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();
    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}
