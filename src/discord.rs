//! Discord adapters for the moderation scheduler
//!
//! Scopes are guild ids and subjects are user ids, both as decimal strings.
//! Removal from a guild is a ban, and restoring membership lifts that ban; bots
//! cannot re-add users directly.

use crate::config::GuildConfig;
use crate::moderation::{IdentityResolver, MembershipService, ModerationError, ModerationResult};
use async_trait::async_trait;
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, CreateAllowedMentions, CreateMessage, GuildId, Http, UserId};
use std::sync::Arc;
use tracing::{debug, info};

/// Membership service backed by the Discord HTTP API
#[derive(Clone)]
pub struct DiscordMembership {
    http: Arc<Http>,
    guilds: Arc<DashMap<u64, GuildConfig>>,
}

impl DiscordMembership {
    #[must_use]
    pub fn new(http: Arc<Http>, guilds: Arc<DashMap<u64, GuildConfig>>) -> Self {
        Self { http, guilds }
    }

    /// Channel that receives notifications for a guild
    async fn notify_channel(&self, guild_id: GuildId) -> ModerationResult<ChannelId> {
        let configured = self
            .guilds
            .get(&guild_id.get())
            .and_then(|config| config.notify_channel_id);
        if let Some(channel_id) = configured {
            return Ok(ChannelId::new(channel_id));
        }

        let guild = guild_id.to_partial_guild(&*self.http).await?;
        guild
            .system_channel_id
            .ok_or_else(|| ModerationError::ExternalActionFailed(format!("guild {guild_id} has no notification channel")))
    }
}

#[async_trait]
impl MembershipService for DiscordMembership {
    async fn remove_member(&self, scope_id: &str, subject_id: &str) -> ModerationResult<()> {
        let guild_id = parse_guild(scope_id)?;
        let user_id = parse_user(subject_id)?;
        info!("Banning user {user_id} in guild {guild_id}");

        guild_id
            .ban_with_reason(&*self.http, user_id, 0, "Temporary ban")
            .await?;
        Ok(())
    }

    async fn kick_member(&self, scope_id: &str, subject_id: &str) -> ModerationResult<()> {
        let guild_id = parse_guild(scope_id)?;
        let user_id = parse_user(subject_id)?;
        info!("Kicking user {user_id} from guild {guild_id}");

        guild_id
            .kick_with_reason(&*self.http, user_id, "Warn limit reached")
            .await?;
        Ok(())
    }

    async fn add_member(&self, scope_id: &str, subject_id: &str) -> ModerationResult<()> {
        let guild_id = parse_guild(scope_id)?;
        let user_id = parse_user(subject_id)?;
        info!("Unbanning user {user_id} in guild {guild_id}");

        guild_id.unban(&*self.http, user_id).await?;
        Ok(())
    }

    async fn notify(&self, scope_id: &str, text: &str, mentions: &[String]) -> ModerationResult<()> {
        let guild_id = parse_guild(scope_id)?;
        let channel_id = self.notify_channel(guild_id).await?;

        let users: Vec<UserId> = mentions.iter().filter_map(|m| parse_user(m).ok()).collect();
        let content = render_mentions(text, &users);

        channel_id
            .send_message(
                &*self.http,
                CreateMessage::new()
                    .content(content)
                    .allowed_mentions(CreateAllowedMentions::new().users(users)),
            )
            .await?;
        debug!("Sent notification to channel {channel_id}");
        Ok(())
    }
}

/// Accepts raw ids and user mentions (`<@id>`, `<@!id>`)
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscordIdentity;

#[async_trait]
impl IdentityResolver for DiscordIdentity {
    async fn resolve(&self, raw: &str) -> String {
        canonical_user_id(raw)
    }
}

/// Strip mention syntax around a user id
#[must_use]
pub fn canonical_user_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .map_or(trimmed, |rest| rest.trim_start_matches('!'));
    inner.to_string()
}

fn render_mentions(text: &str, users: &[UserId]) -> String {
    if users.is_empty() {
        return text.to_string();
    }
    let mentions: Vec<String> = users.iter().map(|u| format!("<@{u}>")).collect();
    format!("{} {text}", mentions.join(" "))
}

fn parse_guild(scope_id: &str) -> ModerationResult<GuildId> {
    parse_snowflake(scope_id)
        .map(GuildId::new)
        .ok_or_else(|| ModerationError::ExternalActionFailed(format!("invalid guild id: {scope_id}")))
}

fn parse_user(subject_id: &str) -> ModerationResult<UserId> {
    parse_snowflake(subject_id)
        .map(UserId::new)
        .ok_or_else(|| ModerationError::ExternalActionFailed(format!("invalid user id: {subject_id}")))
}

// Snowflakes are never zero; the id constructors panic on it
fn parse_snowflake(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|id| *id != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_user_id() {
        assert_eq!(canonical_user_id("<@123>"), "123");
        assert_eq!(canonical_user_id("<@!123>"), "123");
        assert_eq!(canonical_user_id(" 123 "), "123");
        assert_eq!(canonical_user_id("<#123>"), "<#123>");
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let identity = DiscordIdentity;
        let once = identity.resolve("<@!42>").await;
        assert_eq!(identity.resolve(&once).await, once);
        assert!(identity.same_subject(&once, "<@42>"));
    }

    #[test]
    fn test_render_mentions() {
        let users = vec![UserId::new(5)];
        assert_eq!(render_mentions("Mute expired.", &users), "<@5> Mute expired.");
        assert_eq!(render_mentions("Hi", &[]), "Hi");
    }

    #[test]
    fn test_invalid_ids_are_external_failures() {
        assert_eq!(parse_guild("abc").unwrap_err().reason(), "external_action_failed");
        assert!(parse_user("0").is_err());
        assert_eq!(parse_user("77").unwrap(), UserId::new(77));
    }
}
