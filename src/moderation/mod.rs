//! Durable moderation scheduler
//!
//! Tracks time-bounded restrictions per (scope, subject), persists them across
//! restarts, lifts them at expiry through the membership service, and retries
//! failed restorations on a fixed interval.

mod entry;
mod error;
mod executor;
mod external;
mod rehydrate;
mod scheduler;
mod store;
mod timers;

#[cfg(test)]
pub(crate) mod test_support;

pub use entry::{Collections, ModerationEntry, RestrictionKind, SchedulerKey, ScopedEntries, WarnBook};
pub use error::{ModerationError, ModerationResult};
pub use executor::ExpiryOutcome;
pub use external::{Clock, IdentityResolver, MembershipService, PassthroughIdentity, SystemClock};
pub use rehydrate::RehydrationReport;
pub use scheduler::{
    ActiveRestriction, BotBanStatus, BotWarnOutcome, Collaborators, ModerationScheduler,
    SchedulerPolicy, WarnOutcome,
};
pub use store::{CollectionKind, MemoryBackend, ModerationStore, StorageBackend, StoreGuard, YamlDirBackend};
pub use timers::TimerRegistry;

use std::time::Duration;

/// Failed restorations retried before a tempban is given up
pub const MAX_RETRIES: u32 = 5;
/// Fixed delay between restoration attempts
pub const RETRY_INTERVAL: Duration = Duration::from_secs(60);
/// Warns that trigger an escalation
pub const WARN_THRESHOLD: u32 = 3;
/// Bot suspension applied when a subject reaches the bot warn threshold
pub const BOT_WARN_BAN: Duration = Duration::from_secs(24 * 60 * 60);
