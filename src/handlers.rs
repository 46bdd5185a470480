use crate::moderation::WarnOutcome;
use crate::{Data, EVENT_TARGET};
use poise::serenity_prelude::{self as serenity, Context, EventHandler, GuildId, Message, Ready};
use tracing::{debug, error, info, warn};

/// Gateway event handler; enforces mutes and automatic spam warns
pub struct Handler {
    pub data: Data,
}

impl Handler {
    #[must_use]
    pub fn new(data: Data) -> Self {
        Self { data }
    }

    /// Delete messages from muted members; returns whether the message was dropped
    async fn enforce_mute(&self, ctx: &Context, msg: &Message, guild_id: GuildId) -> bool {
        let muted = match self
            .data
            .scheduler
            .is_muted(&guild_id.to_string(), &msg.author.id.to_string())
            .await
        {
            Ok(muted) => muted,
            Err(e) => {
                error!(target: EVENT_TARGET, guild_id = %guild_id, error = %e, "Mute lookup failed");
                return false;
            }
        };
        if !muted {
            return false;
        }

        if let Err(e) = msg.delete(&ctx.http).await {
            warn!(
                target: EVENT_TARGET,
                guild_id = %guild_id,
                user_id = %msg.author.id,
                error = %e,
                "Could not delete message from muted member"
            );
        }
        true
    }

    async fn check_spam(&self, ctx: &Context, msg: &Message, guild_id: GuildId) {
        if !self.data.guild_config(guild_id).autospam {
            return;
        }

        let scope = guild_id.to_string();
        let subject = msg.author.id.to_string();
        let now = self.data.scheduler.now_millis();
        if !self.data.spam.record(&scope, &subject, now) {
            return;
        }

        debug!(target: EVENT_TARGET, guild_id = %guild_id, user_id = %subject, "Message flood detected");
        let text = match self.data.scheduler.warn(&scope, &subject).await {
            Ok(outcome) => spam_warning(msg.author.id, &outcome),
            Err(e) => {
                error!(target: EVENT_TARGET, guild_id = %guild_id, error = %e, "Automatic warn failed");
                return;
            }
        };
        if let Err(e) = msg.channel_id.say(&ctx.http, text).await {
            warn!(target: EVENT_TARGET, channel_id = %msg.channel_id, error = %e, "Could not post spam warning");
        }
    }
}

fn spam_warning(user_id: serenity::UserId, outcome: &WarnOutcome) -> String {
    match outcome {
        WarnOutcome::Recorded { count, threshold } => {
            format!("⚠️ <@{user_id}> slow down! Automatic warn ({count}/{threshold}).")
        }
        WarnOutcome::Escalated { count } => {
            format!("❌ <@{user_id}> reached {count} warns and was kicked for spamming.")
        }
        WarnOutcome::EscalationFailed { count, .. } => {
            format!("⚠️ <@{user_id}> reached {count} warns but could not be kicked.")
        }
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!("Cache ready! The bot is in {guild_count} guild(s)");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        if self.enforce_mute(&ctx, &msg, guild_id).await {
            return;
        }
        self.check_spam(&ctx, &msg, guild_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poise::serenity_prelude::UserId;

    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[test]
    fn test_spam_warning_text() {
        let user = UserId::new(9);
        let text = spam_warning(user, &WarnOutcome::Recorded { count: 2, threshold: 3 });
        assert!(text.contains("<@9>"));
        assert!(text.contains("2/3"));

        let text = spam_warning(user, &WarnOutcome::Escalated { count: 3 });
        assert!(text.contains("kicked"));

        let text = spam_warning(
            user,
            &WarnOutcome::EscalationFailed { count: 3, reason: "external_action_failed".to_string() },
        );
        assert!(text.contains("could not be kicked"));
    }
}
