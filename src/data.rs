use std::{ops::Deref, path::PathBuf, sync::Arc};

use crate::config::{BotConfig, GuildConfig};
use crate::moderation::ModerationScheduler;
use crate::spam::SpamTracker;
use dashmap::DashMap;
use poise::serenity_prelude as serenity;

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config_path", &self.config_path)
            .field("guild_configs", &self.guild_configs)
            .field("scheduler", &self.scheduler)
            .field("spam", &self.spam)
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    /// Create the shared bot state
    ///
    /// `guild_configs` should be the same map handed to the Discord membership
    /// service so notification channel changes are seen by both.
    #[must_use]
    pub fn new(
        config: BotConfig,
        config_path: PathBuf,
        guild_configs: Arc<DashMap<u64, GuildConfig>>,
        scheduler: ModerationScheduler,
    ) -> Self {
        let spam = SpamTracker::new(config.spam);
        Self(Arc::new(DataInner {
            config,
            config_path,
            guild_configs,
            scheduler,
            spam,
        }))
    }

    /// Get the configuration for a specific guild
    #[must_use]
    pub fn guild_config(&self, guild_id: serenity::GuildId) -> GuildConfig {
        self.guild_configs
            .get(&guild_id.get())
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Update a guild's configuration and persist it
    ///
    /// # Errors
    /// Returns an error if the configuration file cannot be written
    pub async fn update_guild_config<F>(
        &self,
        guild_id: serenity::GuildId,
        update: F,
    ) -> Result<GuildConfig, crate::Error>
    where
        F: FnOnce(&mut GuildConfig),
    {
        let updated = {
            let mut entry = self.guild_configs.entry(guild_id.get()).or_default();
            update(entry.value_mut());
            entry.value().clone()
        };
        self.save_config().await?;
        Ok(updated)
    }

    /// Whether a user may run bot-level moderation
    #[must_use]
    pub fn is_bot_moderator(&self, user_id: serenity::UserId) -> bool {
        self.config.is_moderator(user_id.get())
    }

    /// Write the configuration, including current guild settings
    ///
    /// # Errors
    /// Returns an error if the configuration cannot be serialized or written
    pub async fn save_config(&self) -> Result<(), crate::Error> {
        let mut config = self.config.clone();
        config.guilds = self
            .guild_configs
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        config.save(&self.config_path).await
    }
}

/// Main centralized data structure for the bot
pub struct DataInner {
    // Configuration as loaded at startup; guild settings live in `guild_configs`
    pub config: BotConfig,
    pub config_path: PathBuf,
    // Map of guild_id -> guild configuration
    pub guild_configs: Arc<DashMap<u64, GuildConfig>>,
    pub scheduler: ModerationScheduler,
    pub spam: SpamTracker,
}

/// Tests for the data module
#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::test_support::harness;
    use poise::serenity_prelude::{GuildId, UserId};
    use uuid::Uuid;

    async fn data(config: BotConfig) -> (Data, PathBuf) {
        let path = std::env::temp_dir()
            .join(format!("aegis-data-{}", Uuid::new_v4()))
            .join("bot_config.yaml");
        let guilds = Arc::new(config.guilds.clone().into_iter().collect::<DashMap<_, _>>());
        let h = harness().await;
        (Data::new(config, path.clone(), guilds, h.scheduler), path)
    }

    #[tokio::test]
    async fn test_guild_config_defaults() {
        let (data, _) = data(BotConfig::default()).await;
        let config = data.guild_config(GuildId::new(1));
        assert!(config.autospam);
        assert!(config.notify_channel_id.is_none());
    }

    #[tokio::test]
    async fn test_update_guild_config_persists() {
        let (data, path) = data(BotConfig::default()).await;

        let updated = data
            .update_guild_config(GuildId::new(5), |c| c.autospam = false)
            .await
            .unwrap();
        assert!(!updated.autospam);
        assert!(!data.guild_config(GuildId::new(5)).autospam);

        let saved = BotConfig::load(&path).await;
        assert!(!saved.guild(5).autospam);

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }

    #[tokio::test]
    async fn test_bot_moderators() {
        let config = BotConfig {
            owners: vec![10],
            moderators: vec![11],
            ..BotConfig::default()
        };
        let (data, _) = data(config).await;
        assert!(data.is_bot_moderator(UserId::new(10)));
        assert!(data.is_bot_moderator(UserId::new(11)));
        assert!(!data.is_bot_moderator(UserId::new(12)));
    }

    #[tokio::test]
    async fn test_data_debug_impl() {
        let (data, _) = data(BotConfig::default()).await;
        let debug_output = format!("{data:?}");
        assert!(debug_output.contains("Data"));
        assert!(debug_output.contains("guild_configs"));
        assert!(debug_output.contains("scheduler"));
    }
}
