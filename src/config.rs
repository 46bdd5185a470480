//! Bot configuration
//!
//! Loaded from `data/bot_config.yaml` (or the path in `AEGIS_CONFIG`). A missing
//! or unreadable file falls back to defaults and a fresh baseline is written.

use crate::moderation::SchedulerPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_FILE: &str = "data/bot_config.yaml";
pub const CONFIG_ENV: &str = "AEGIS_CONFIG";

/// Per-guild settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildConfig {
    /// Channel that receives expiry notifications; the system channel otherwise
    pub notify_channel_id: Option<u64>,
    /// Automatic warns for message floods
    pub autospam: bool,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            notify_channel_id: None,
            autospam: true,
        }
    }
}

/// Retry and escalation tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_retries: u32,
    pub retry_interval_secs: u64,
    pub warn_threshold: u32,
    pub bot_warn_ban_hours: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let policy = SchedulerPolicy::default();
        Self {
            max_retries: policy.max_retries,
            retry_interval_secs: policy.retry_interval.as_secs(),
            warn_threshold: policy.warn_threshold,
            bot_warn_ban_hours: policy.bot_warn_ban.as_secs() / 3600,
        }
    }
}

impl From<&PolicyConfig> for SchedulerPolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_interval: Duration::from_secs(config.retry_interval_secs),
            warn_threshold: config.warn_threshold.max(1),
            bot_warn_ban: Duration::from_secs(config.bot_warn_ban_hours.saturating_mul(3600)),
        }
    }
}

/// Flood detection settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamConfig {
    /// Sliding window length
    pub window_ms: i64,
    /// Messages inside the window that count as a flood
    pub max_messages: usize,
    /// Minimum gap between automatic warns for one subject
    pub warn_cooldown_ms: i64,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            window_ms: 7_000,
            max_messages: 5,
            warn_cooldown_ms: 10_000,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// May use every command, including bot-level moderation
    pub owners: Vec<u64>,
    /// May use bot-level moderation
    pub moderators: Vec<u64>,
    pub guilds: BTreeMap<u64, GuildConfig>,
    pub policy: PolicyConfig,
    pub spam: SpamConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            owners: Vec::new(),
            moderators: Vec::new(),
            guilds: BTreeMap::new(),
            policy: PolicyConfig::default(),
            spam: SpamConfig::default(),
        }
    }
}

impl BotConfig {
    /// Config path from the environment, or the default
    #[must_use]
    pub fn path() -> PathBuf {
        std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
    }

    /// Load the configuration, writing a baseline if it is missing or invalid
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_yaml::from_str::<Self>(&content) {
                Ok(config) => return config,
                Err(e) => warn!(path = %path.display(), error = %e, "Invalid config, using defaults"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config found, writing defaults");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Unreadable config, using defaults"),
        }

        let config = Self::default();
        if let Err(e) = config.save(path).await {
            warn!(path = %path.display(), error = %e, "Failed to write default config");
        }
        config
    }

    /// Save the configuration
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created, or the file cannot be
    /// serialized or written
    pub async fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let yaml = serde_yaml::to_string(self)?;
        tokio::fs::write(path, yaml).await?;
        Ok(())
    }

    /// Settings for a guild, defaults if it has none
    #[must_use]
    pub fn guild(&self, guild_id: u64) -> GuildConfig {
        self.guilds.get(&guild_id).cloned().unwrap_or_default()
    }

    /// Whether a user may run bot-level moderation
    #[must_use]
    pub fn is_moderator(&self, user_id: u64) -> bool {
        self.owners.contains(&user_id) || self.moderators.contains(&user_id)
    }

    #[must_use]
    pub fn scheduler_policy(&self) -> SchedulerPolicy {
        SchedulerPolicy::from(&self.policy)
    }
}
