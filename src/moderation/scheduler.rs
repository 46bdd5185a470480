//! Moderation scheduler façade
//!
//! Every operation that creates or lifts a restriction updates the store and the
//! timer registry under one store lock, so callers never observe a persisted entry
//! without its timer or a timer without its entry.

use crate::SCHEDULER_TARGET;
use crate::moderation::entry::{Collections, ModerationEntry, RestrictionKind, SchedulerKey};
use crate::moderation::external::{Clock, IdentityResolver, MembershipService};
use crate::moderation::store::{CollectionKind, ModerationStore, StoreGuard};
use crate::moderation::timers::TimerRegistry;
use crate::moderation::{
    BOT_WARN_BAN, MAX_RETRIES, ModerationError, ModerationResult, RETRY_INTERVAL, WARN_THRESHOLD,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Tunables for retries and warn escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerPolicy {
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub warn_threshold: u32,
    pub bot_warn_ban: Duration,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_interval: RETRY_INTERVAL,
            warn_threshold: WARN_THRESHOLD,
            bot_warn_ban: BOT_WARN_BAN,
        }
    }
}

/// External services the scheduler depends on
#[derive(Clone)]
pub struct Collaborators {
    pub membership: Arc<dyn MembershipService>,
    pub identity: Arc<dyn IdentityResolver>,
    pub clock: Arc<dyn Clock>,
}

/// Result of a group warn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarnOutcome {
    /// Counter incremented, threshold not reached
    Recorded { count: u32, threshold: u32 },
    /// Threshold reached, subject kicked and counter reset
    Escalated { count: u32 },
    /// Threshold reached but the kick failed; the counter is kept
    EscalationFailed { count: u32, reason: String },
}

/// Result of a bot-level warn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotWarnOutcome {
    Recorded { count: u32, threshold: u32 },
    /// Threshold reached, counter reset and a bot tempban applied
    Suspended { expires_at: i64 },
    /// Threshold reached, counter reset, subject was already suspended
    AlreadySuspended,
}

/// Whether a subject may use bot commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotBanStatus {
    None,
    Permanent,
    Temporary { expires_at: i64 },
}

/// A listed restriction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRestriction {
    pub entry: ModerationEntry,
    pub remaining: Duration,
    /// False once the entry has no pending timer, e.g. a tempban that was given up
    pub scheduled: bool,
}

pub(crate) struct SchedulerInner {
    pub(crate) store: ModerationStore,
    pub(crate) timers: TimerRegistry,
    pub(crate) membership: Arc<dyn MembershipService>,
    pub(crate) identity: Arc<dyn IdentityResolver>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) policy: SchedulerPolicy,
}

/// Shared handle to the moderation scheduler
#[derive(Clone)]
pub struct ModerationScheduler {
    pub(crate) inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for ModerationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationScheduler")
            .field("timers", &self.inner.timers)
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl ModerationScheduler {
    /// Wrap a loaded store without arming anything
    ///
    /// Use [`ModerationScheduler::start`] to also re-arm persisted entries.
    pub(crate) fn new(store: ModerationStore, collaborators: Collaborators, policy: SchedulerPolicy) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                timers: TimerRegistry::new(),
                membership: collaborators.membership,
                identity: collaborators.identity,
                clock: collaborators.clock,
                policy,
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &ModerationStore {
        &self.inner.store
    }

    #[must_use]
    pub fn timers(&self) -> &TimerRegistry {
        &self.inner.timers
    }

    #[must_use]
    pub fn policy(&self) -> SchedulerPolicy {
        self.inner.policy
    }

    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    /// Abort every pending timer; persisted entries are left untouched
    pub fn shutdown(&self) {
        let armed = self.inner.timers.armed_count();
        self.inner.timers.cancel_all();
        info!(target: SCHEDULER_TARGET, armed, "Scheduler timers stopped");
    }

    /// Mute a subject in a scope until `duration` has passed
    ///
    /// # Errors
    /// `AlreadyRestricted` if the subject has an active mute, or a storage error
    pub async fn mute(&self, scope_id: &str, subject: &str, duration: Duration) -> ModerationResult<ModerationEntry> {
        let subject = self.inner.identity.resolve(subject).await;
        let now = self.now_millis();
        let mut state = self.inner.store.lock().await;

        let lapsed = self.check_vacant(&state, RestrictionKind::Mute, scope_id, &subject, now)?;

        let entry = ModerationEntry::new(&subject, now.saturating_add(duration_ms(duration)));
        if let Some(lapsed) = lapsed {
            state.remove(&lapsed);
        }
        state.insert(RestrictionKind::Mute, scope_id, entry.clone());
        state.save(CollectionKind::Mutes).await?;
        self.arm_expiry(SchedulerKey::mute(scope_id, &subject), duration);

        info!(target: SCHEDULER_TARGET, scope = scope_id, subject = %subject, expires_at = entry.expires_at, event = "mute", "Subject muted");
        Ok(entry)
    }

    /// Lift a mute early
    ///
    /// # Errors
    /// `NotFound` if the subject is not muted, or a storage error
    pub async fn unmute(&self, scope_id: &str, subject: &str) -> ModerationResult<ModerationEntry> {
        let removed = self.release(RestrictionKind::Mute, scope_id, subject).await?;
        info!(target: SCHEDULER_TARGET, scope = scope_id, subject = %removed.subject_id, event = "unmute", "Mute lifted");
        Ok(removed)
    }

    /// Remove a subject from a scope and restore them after `duration`
    ///
    /// The removal must succeed before anything is recorded.
    ///
    /// # Errors
    /// `AlreadyRestricted`, `ExternalActionFailed` if the removal fails, or a storage error
    pub async fn tempban(&self, scope_id: &str, subject: &str, duration: Duration) -> ModerationResult<ModerationEntry> {
        let subject = self.inner.identity.resolve(subject).await;
        let now = self.now_millis();
        let mut state = self.inner.store.lock().await;

        let lapsed = self.check_vacant(&state, RestrictionKind::Tempban, scope_id, &subject, now)?;

        self.inner.membership.remove_member(scope_id, &subject).await?;

        let entry = ModerationEntry::new(&subject, now.saturating_add(duration_ms(duration)));
        if let Some(lapsed) = lapsed {
            state.remove(&lapsed);
        }
        state.insert(RestrictionKind::Tempban, scope_id, entry.clone());
        if let Err(e) = state.save(CollectionKind::Tempbans).await {
            error!(
                target: SCHEDULER_TARGET,
                scope = scope_id,
                subject = %subject,
                error = %e,
                event = "tempban_unrecorded",
                "Subject was removed but the tempban could not be recorded"
            );
            return Err(e);
        }
        self.arm_expiry(SchedulerKey::tempban(scope_id, &subject), duration);

        info!(target: SCHEDULER_TARGET, scope = scope_id, subject = %subject, expires_at = entry.expires_at, event = "tempban", "Subject tempbanned");
        Ok(entry)
    }

    /// Drop a tempban early without restoring membership
    ///
    /// # Errors
    /// `NotFound` if there is no tempban, or a storage error
    pub async fn unban(&self, scope_id: &str, subject: &str) -> ModerationResult<ModerationEntry> {
        let removed = self.release(RestrictionKind::Tempban, scope_id, subject).await?;
        info!(
            target: SCHEDULER_TARGET,
            scope = scope_id,
            subject = %removed.subject_id,
            attempts = removed.attempts,
            event = "unban",
            "Tempban lifted"
        );
        Ok(removed)
    }

    /// Suspend a subject from bot commands until `duration` has passed
    ///
    /// # Errors
    /// `AlreadyRestricted` if the subject is already suspended, or a storage error
    pub async fn bot_tempban(&self, subject: &str, duration: Duration) -> ModerationResult<ModerationEntry> {
        let subject = self.inner.identity.resolve(subject).await;
        let now = self.now_millis();
        let mut state = self.inner.store.lock().await;

        if self.is_bot_banned(&state, &subject) {
            return Err(ModerationError::AlreadyRestricted(format!("{subject} is permanently banned from the bot")));
        }
        if let Some(lapsed) = self.check_vacant(&state, RestrictionKind::BotTempban, "", &subject, now)? {
            state.remove(&lapsed);
        }

        let entry = self.insert_bot_tempban(&mut state, &subject, duration, now).await?;
        info!(target: SCHEDULER_TARGET, subject = %subject, expires_at = entry.expires_at, event = "bot_tempban", "Subject suspended from bot");
        Ok(entry)
    }

    /// Lift a bot suspension early
    ///
    /// # Errors
    /// `NotFound` if the subject is not suspended, or a storage error
    pub async fn bot_unban(&self, subject: &str) -> ModerationResult<ModerationEntry> {
        let removed = self.release(RestrictionKind::BotTempban, "", subject).await?;
        info!(target: SCHEDULER_TARGET, subject = %removed.subject_id, event = "bot_unban", "Bot suspension lifted");
        Ok(removed)
    }

    /// Permanently ban a subject from bot commands, replacing any suspension
    ///
    /// # Errors
    /// `AlreadyRestricted` if already banned, or a storage error
    pub async fn bot_ban(&self, subject: &str) -> ModerationResult<()> {
        let subject = self.inner.identity.resolve(subject).await;
        let mut state = self.inner.store.lock().await;

        if self.is_bot_banned(&state, &subject) {
            return Err(ModerationError::AlreadyRestricted(format!("{subject} is already banned from the bot")));
        }
        state.bot_bans.insert(subject.clone());
        state.save(CollectionKind::BotBans).await?;

        let key = SchedulerKey::bot_tempban(&subject);
        if state.remove(&key).is_some() {
            state.save(CollectionKind::BotTempbans).await?;
            self.inner.timers.cancel(&key);
        }

        info!(target: SCHEDULER_TARGET, subject = %subject, event = "bot_ban", "Subject banned from bot");
        Ok(())
    }

    /// Lift a permanent bot ban
    ///
    /// # Errors
    /// `NotFound` if the subject is not banned, or a storage error
    pub async fn bot_unban_permanent(&self, subject: &str) -> ModerationResult<()> {
        let subject = self.inner.identity.resolve(subject).await;
        let mut state = self.inner.store.lock().await;

        let Some(stored) = state
            .bot_bans
            .iter()
            .find(|b| self.inner.identity.same_subject(b, &subject))
            .cloned()
        else {
            return Err(ModerationError::NotFound(format!("{subject} is not banned from the bot")));
        };
        state.bot_bans.remove(&stored);
        state.save(CollectionKind::BotBans).await?;

        info!(target: SCHEDULER_TARGET, subject = %stored, event = "bot_unban_permanent", "Permanent bot ban lifted");
        Ok(())
    }

    /// Add a warn and kick the subject once the threshold is reached
    ///
    /// # Errors
    /// Storage errors only; a failed kick is reported through the outcome
    pub async fn warn(&self, scope_id: &str, subject: &str) -> ModerationResult<WarnOutcome> {
        let subject = self.inner.identity.resolve(subject).await;
        let threshold = self.inner.policy.warn_threshold;
        let mut state = self.inner.store.lock().await;

        let count = state.warns.increment(Some(scope_id), &subject);
        state.save(CollectionKind::Warns).await?;
        info!(target: SCHEDULER_TARGET, scope = scope_id, subject = %subject, count, event = "warn", "Warn recorded");

        if count < threshold {
            return Ok(WarnOutcome::Recorded { count, threshold });
        }

        match self.inner.membership.kick_member(scope_id, &subject).await {
            Ok(()) => {
                state.warns.reset(Some(scope_id), &subject);
                state.save(CollectionKind::Warns).await?;
                info!(target: SCHEDULER_TARGET, scope = scope_id, subject = %subject, count, event = "warn_escalated", "Warn threshold reached, subject kicked");
                Ok(WarnOutcome::Escalated { count })
            }
            Err(e) => {
                warn!(target: SCHEDULER_TARGET, scope = scope_id, subject = %subject, count, error = %e, event = "warn_escalation_failed", "Warn threshold reached but kick failed");
                Ok(WarnOutcome::EscalationFailed {
                    count,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Reset a subject's warns in a scope, returning the previous count
    ///
    /// # Errors
    /// `NotFound` if the subject has no warns, or a storage error
    pub async fn clear_warns(&self, scope_id: &str, subject: &str) -> ModerationResult<u32> {
        let subject = self.inner.identity.resolve(subject).await;
        let mut state = self.inner.store.lock().await;

        let previous = state
            .warns
            .reset(Some(scope_id), &subject)
            .ok_or_else(|| ModerationError::NotFound(format!("{subject} has no warns in {scope_id}")))?;
        state.save(CollectionKind::Warns).await?;
        Ok(previous)
    }

    /// Remove a subject from a scope and reset their warns
    ///
    /// # Errors
    /// `ExternalActionFailed` if the removal fails, or a storage error
    pub async fn kick(&self, scope_id: &str, subject: &str) -> ModerationResult<()> {
        let subject = self.inner.identity.resolve(subject).await;
        self.inner.membership.kick_member(scope_id, &subject).await?;

        let mut state = self.inner.store.lock().await;
        if state.warns.reset(Some(scope_id), &subject).is_some() {
            state.save(CollectionKind::Warns).await?;
        }
        info!(target: SCHEDULER_TARGET, scope = scope_id, subject = %subject, event = "kick", "Subject kicked");
        Ok(())
    }

    /// Add a bot-level warn, suspending the subject at the threshold
    ///
    /// # Errors
    /// Storage errors
    pub async fn bot_warn(&self, subject: &str) -> ModerationResult<BotWarnOutcome> {
        let subject = self.inner.identity.resolve(subject).await;
        let threshold = self.inner.policy.warn_threshold;
        let now = self.now_millis();
        let mut state = self.inner.store.lock().await;

        let count = state.warns.increment(None, &subject);
        if count < threshold {
            state.save(CollectionKind::Warns).await?;
            return Ok(BotWarnOutcome::Recorded { count, threshold });
        }

        state.warns.reset(None, &subject);
        state.save(CollectionKind::Warns).await?;

        let suspended = self.is_bot_banned(&state, &subject)
            || self
                .find_subject(&state, RestrictionKind::BotTempban, "", &subject)
                .is_some_and(|e| !e.is_expired(now));
        if suspended {
            return Ok(BotWarnOutcome::AlreadySuspended);
        }

        let duration = self.inner.policy.bot_warn_ban;
        let entry = self.insert_bot_tempban(&mut state, &subject, duration, now).await?;
        info!(target: SCHEDULER_TARGET, subject = %subject, expires_at = entry.expires_at, event = "bot_warn_escalated", "Bot warn threshold reached, subject suspended");
        Ok(BotWarnOutcome::Suspended {
            expires_at: entry.expires_at,
        })
    }

    /// Reset a subject's bot-level warns, returning the previous count
    ///
    /// # Errors
    /// Storage errors
    pub async fn bot_clear_warns(&self, subject: &str) -> ModerationResult<u32> {
        let subject = self.inner.identity.resolve(subject).await;
        let mut state = self.inner.store.lock().await;

        match state.warns.reset(None, &subject) {
            Some(previous) => {
                state.save(CollectionKind::Warns).await?;
                Ok(previous)
            }
            None => Ok(0),
        }
    }

    /// Whether a subject is currently muted in a scope
    ///
    /// Lapsed mutes with no pending timer are cleaned up here.
    ///
    /// # Errors
    /// Storage errors from the cleanup
    pub async fn is_muted(&self, scope_id: &str, subject: &str) -> ModerationResult<bool> {
        let subject = self.inner.identity.resolve(subject).await;
        let now = self.now_millis();
        let mut state = self.inner.store.lock().await;

        let Some(entry) = self.find_subject(&state, RestrictionKind::Mute, scope_id, &subject) else {
            return Ok(false);
        };
        if !entry.is_expired(now) {
            return Ok(true);
        }
        self.drop_stale(&mut state, &SchedulerKey::mute(scope_id, &entry.subject_id)).await?;
        Ok(false)
    }

    /// Whether and how a subject is barred from bot commands
    ///
    /// # Errors
    /// Storage errors from the cleanup of a lapsed suspension
    pub async fn bot_ban_status(&self, subject: &str) -> ModerationResult<BotBanStatus> {
        let subject = self.inner.identity.resolve(subject).await;
        let now = self.now_millis();
        let mut state = self.inner.store.lock().await;

        if self.is_bot_banned(&state, &subject) {
            return Ok(BotBanStatus::Permanent);
        }
        let Some(entry) = self.find_subject(&state, RestrictionKind::BotTempban, "", &subject) else {
            return Ok(BotBanStatus::None);
        };
        if !entry.is_expired(now) {
            return Ok(BotBanStatus::Temporary {
                expires_at: entry.expires_at,
            });
        }
        self.drop_stale(&mut state, &SchedulerKey::bot_tempban(&entry.subject_id)).await?;
        Ok(BotBanStatus::None)
    }

    /// Mutes in a scope
    pub async fn active_mutes(&self, scope_id: &str) -> Vec<ActiveRestriction> {
        self.list(RestrictionKind::Mute, scope_id).await
    }

    /// Tempbans in a scope, including ones whose restoration was given up
    pub async fn active_tempbans(&self, scope_id: &str) -> Vec<ActiveRestriction> {
        self.list(RestrictionKind::Tempban, scope_id).await
    }

    /// Current bot suspensions
    pub async fn active_bot_tempbans(&self) -> Vec<ActiveRestriction> {
        self.list(RestrictionKind::BotTempban, "").await
    }

    /// Warn counters in a scope
    pub async fn warn_counts(&self, scope_id: &str) -> BTreeMap<String, u32> {
        let state = self.inner.store.lock().await;
        state.warns.groups.get(scope_id).cloned().unwrap_or_default()
    }

    async fn list(&self, kind: RestrictionKind, scope_id: &str) -> Vec<ActiveRestriction> {
        let now = self.now_millis();
        let state = self.inner.store.lock().await;
        state
            .entries(kind, scope_id)
            .iter()
            .map(|entry| ActiveRestriction {
                entry: entry.clone(),
                remaining: delay_until(entry, now),
                scheduled: self
                    .inner
                    .timers
                    .is_armed(&SchedulerKey::new(kind, scope_id, &entry.subject_id)),
            })
            .collect()
    }

    /// Delete an entry and its timer in one step
    async fn release(&self, kind: RestrictionKind, scope_id: &str, subject: &str) -> ModerationResult<ModerationEntry> {
        let subject = self.inner.identity.resolve(subject).await;
        let mut state = self.inner.store.lock().await;

        let Some(stored) = self.find_subject(&state, kind, scope_id, &subject) else {
            return Err(ModerationError::NotFound(format!("no {kind} for {subject}")));
        };
        let key = SchedulerKey::new(kind, scope_id, &stored.subject_id);
        let removed = state.remove(&key).unwrap_or(stored);
        state.save(kind.into()).await?;
        self.inner.timers.cancel(&key);
        Ok(removed)
    }

    /// Reject an active restriction of `kind`; a lapsed one is returned so it can be replaced
    fn check_vacant(
        &self,
        state: &Collections,
        kind: RestrictionKind,
        scope_id: &str,
        subject: &str,
        now: i64,
    ) -> ModerationResult<Option<SchedulerKey>> {
        let Some(existing) = self.find_subject(state, kind, scope_id, subject) else {
            return Ok(None);
        };
        if !existing.is_expired(now) {
            return Err(ModerationError::AlreadyRestricted(format!(
                "{subject} already has an active {kind}"
            )));
        }
        Ok(Some(SchedulerKey::new(kind, scope_id, &existing.subject_id)))
    }

    async fn insert_bot_tempban(
        &self,
        state: &mut StoreGuard<'_>,
        subject: &str,
        duration: Duration,
        now: i64,
    ) -> ModerationResult<ModerationEntry> {
        let entry = ModerationEntry::new(subject, now.saturating_add(duration_ms(duration)));
        state.insert(RestrictionKind::BotTempban, "", entry.clone());
        state.save(CollectionKind::BotTempbans).await?;
        self.arm_expiry(SchedulerKey::bot_tempban(subject), duration);
        Ok(entry)
    }

    /// Remove a lapsed entry that no timer will clear
    async fn drop_stale(&self, state: &mut StoreGuard<'_>, key: &SchedulerKey) -> ModerationResult<()> {
        if self.inner.timers.is_armed(key) {
            return Ok(());
        }
        if state.remove(key).is_some() {
            state.save(key.kind.into()).await?;
            info!(target: SCHEDULER_TARGET, key = %key, event = "stale_entry_cleared", "Cleared lapsed entry");
        }
        Ok(())
    }

    fn is_bot_banned(&self, state: &Collections, subject: &str) -> bool {
        state.bot_bans.iter().any(|b| self.inner.identity.same_subject(b, subject))
    }

    fn find_subject(
        &self,
        state: &Collections,
        kind: RestrictionKind,
        scope_id: &str,
        subject: &str,
    ) -> Option<ModerationEntry> {
        state
            .find(kind, scope_id, |stored| self.inner.identity.same_subject(stored, subject))
            .cloned()
    }
}

pub(crate) fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Delay from `now` until the entry expires, zero if already past
pub(crate) fn delay_until(entry: &ModerationEntry, now: i64) -> Duration {
    Duration::from_millis(u64::try_from(entry.remaining_ms(now)).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::test_support::{Call, FakeMembership, harness, harness_with};

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_mute_is_rejected() {
        let h = harness().await;

        h.scheduler.mute("g", "u", MINUTE).await.unwrap();
        let err = h.scheduler.mute("g", "u", MINUTE).await.unwrap_err();
        assert_eq!(err.reason(), "already_restricted");

        // Ids without digits only match exactly
        h.scheduler.mute("g", "<@u>", MINUTE).await.unwrap();
        let state = h.scheduler.store().snapshot().await;
        assert_eq!(state.entries(RestrictionKind::Mute, "g").len(), 2);

        // Digit-normalized ids count as the same subject
        h.scheduler.mute("g", "42", MINUTE).await.unwrap();
        let err = h.scheduler.mute("g", "<@42>", MINUTE).await.unwrap_err();
        assert_eq!(err.reason(), "already_restricted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_twice_keeps_single_entry_and_timer() {
        let h = harness().await;

        h.scheduler.mute("g", "u", MINUTE).await.unwrap();
        assert!(h.scheduler.mute("g", "u", MINUTE).await.is_err());

        let state = h.scheduler.store().snapshot().await;
        assert_eq!(state.entries(RestrictionKind::Mute, "g").len(), 1);
        assert_eq!(h.scheduler.timers().armed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_expires_and_notifies() {
        let h = harness().await;

        h.scheduler.mute("g", "u", MINUTE).await.unwrap();
        assert!(h.scheduler.is_muted("g", "u").await.unwrap());

        tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;

        assert!(!h.scheduler.is_muted("g", "u").await.unwrap());
        assert!(h.scheduler.store().snapshot().await.mutes.is_empty());
        let notes = h.membership.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, MINUTE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmute_cancels_timer_and_suppresses_notification() {
        let h = harness().await;

        h.scheduler.mute("g", "u", MINUTE).await.unwrap();
        h.scheduler.unmute("g", "u").await.unwrap();
        assert!(!h.scheduler.timers().is_armed(&SchedulerKey::mute("g", "u")));

        tokio::time::sleep(MINUTE * 2).await;
        assert!(h.membership.notifications().is_empty());

        let err = h.scheduler.unmute("g", "u").await.unwrap_err();
        assert_eq!(err.reason(), "not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmute_leaves_tempban_retry_alone() {
        let h = harness().await;
        h.membership.fail_restores(2);

        h.scheduler.tempban("g", "u", MINUTE).await.unwrap();
        h.scheduler.mute("g", "u", MINUTE * 10).await.unwrap();

        // First restore fails at 1min, a retry is now in flight
        tokio::time::sleep(MINUTE + Duration::from_secs(5)).await;
        let tempban_key = SchedulerKey::tempban("g", "u");
        assert!(h.scheduler.timers().is_armed(&tempban_key));

        h.scheduler.unmute("g", "u").await.unwrap();
        assert!(h.scheduler.timers().is_armed(&tempban_key));
        let deadline_before = h.scheduler.timers().deadline(&tempban_key);

        h.scheduler.unmute("g", "u").await.unwrap_err();
        assert_eq!(h.scheduler.timers().deadline(&tempban_key), deadline_before);

        tokio::time::sleep(MINUTE * 3).await;
        assert_eq!(h.membership.restores().len(), 3);
        assert!(h.scheduler.store().snapshot().await.tempbans.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tempban_requires_successful_removal() {
        let h = harness().await;
        h.membership.fail_removals(true);

        let err = h.scheduler.tempban("g", "u", MINUTE).await.unwrap_err();
        assert_eq!(err.reason(), "external_action_failed");
        assert!(h.scheduler.store().snapshot().await.tempbans.is_empty());
        assert_eq!(h.scheduler.timers().armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_tempban_does_not_remove_again() {
        let h = harness().await;

        h.scheduler.tempban("g", "u", MINUTE).await.unwrap();
        let err = h.scheduler.tempban("g", "u", MINUTE).await.unwrap_err();
        assert_eq!(err.reason(), "already_restricted");
        assert_eq!(h.membership.removals().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unban_does_not_restore_membership() {
        let h = harness().await;

        h.scheduler.tempban("g", "u", MINUTE).await.unwrap();
        let removed = h.scheduler.unban("g", "u").await.unwrap();
        assert_eq!(removed.subject_id, "u");

        tokio::time::sleep(MINUTE * 5).await;
        assert!(h.membership.restores().is_empty());
        assert_eq!(h.scheduler.timers().armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_leaves_no_timer() {
        let h = harness().await;
        h.backend.set_fail_writes(true);

        let err = h.scheduler.mute("g", "u", MINUTE).await.unwrap_err();
        assert_eq!(err.reason(), "storage");
        assert_eq!(h.scheduler.timers().armed_count(), 0);
        assert!(!h.scheduler.is_muted("g", "u").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_warn_escalates_to_kick_at_threshold() {
        let h = harness().await;

        assert_eq!(
            h.scheduler.warn("g", "u").await.unwrap(),
            WarnOutcome::Recorded { count: 1, threshold: 3 }
        );
        h.scheduler.warn("g", "u").await.unwrap();
        assert_eq!(h.scheduler.warn_counts("g").await.get("u"), Some(&2));

        assert_eq!(h.scheduler.warn("g", "u").await.unwrap(), WarnOutcome::Escalated { count: 3 });
        assert!(h.scheduler.warn_counts("g").await.is_empty());
        assert_eq!(h.membership.removals(), vec![("g".to_string(), "u".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_kick_keeps_warns() {
        let h = harness().await;
        h.membership.fail_removals(true);

        for _ in 0..2 {
            h.scheduler.warn("g", "u").await.unwrap();
        }
        let outcome = h.scheduler.warn("g", "u").await.unwrap();
        assert!(matches!(outcome, WarnOutcome::EscalationFailed { count: 3, .. }));
        assert_eq!(h.scheduler.warn_counts("g").await.get("u"), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_and_clear_warns() {
        let h = harness().await;

        h.scheduler.warn("g", "u").await.unwrap();
        h.scheduler.kick("g", "u").await.unwrap();
        assert!(h.scheduler.warn_counts("g").await.is_empty());

        let err = h.scheduler.clear_warns("g", "u").await.unwrap_err();
        assert_eq!(err.reason(), "not_found");

        h.scheduler.warn("g", "u").await.unwrap();
        h.scheduler.warn("g", "u").await.unwrap();
        assert_eq!(h.scheduler.clear_warns("g", "u").await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bot_warn_suspends_for_a_day() {
        let h = harness().await;

        h.scheduler.bot_warn("u").await.unwrap();
        h.scheduler.bot_warn("u").await.unwrap();
        let outcome = h.scheduler.bot_warn("u").await.unwrap();
        let BotWarnOutcome::Suspended { expires_at } = outcome else {
            panic!("expected suspension, got {outcome:?}");
        };
        assert_eq!(expires_at - h.scheduler.now_millis(), duration_ms(BOT_WARN_BAN));
        assert_eq!(h.scheduler.store().snapshot().await.warns.count(None, "u"), 0);
        assert_eq!(
            h.scheduler.bot_ban_status("u").await.unwrap(),
            BotBanStatus::Temporary { expires_at }
        );

        // Counter restarts and a further threshold hit does not extend the ban
        for _ in 0..2 {
            h.scheduler.bot_warn("u").await.unwrap();
        }
        assert_eq!(h.scheduler.bot_warn("u").await.unwrap(), BotWarnOutcome::AlreadySuspended);

        tokio::time::sleep(BOT_WARN_BAN + MINUTE).await;
        assert_eq!(h.scheduler.bot_ban_status("u").await.unwrap(), BotBanStatus::None);
        assert!(h.scheduler.store().snapshot().await.bot_tempbans.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bot_ban_replaces_bot_tempban() {
        let h = harness().await;

        h.scheduler.bot_tempban("u", MINUTE).await.unwrap();
        h.scheduler.bot_ban("u").await.unwrap();

        assert_eq!(h.scheduler.bot_ban_status("u").await.unwrap(), BotBanStatus::Permanent);
        assert_eq!(h.scheduler.timers().armed_count(), 0);
        assert!(h.scheduler.store().snapshot().await.bot_tempbans.is_empty());

        let err = h.scheduler.bot_tempban("u", MINUTE).await.unwrap_err();
        assert_eq!(err.reason(), "already_restricted");
        let err = h.scheduler.bot_ban("u").await.unwrap_err();
        assert_eq!(err.reason(), "already_restricted");

        h.scheduler.bot_unban_permanent("u").await.unwrap();
        assert_eq!(h.scheduler.bot_ban_status("u").await.unwrap(), BotBanStatus::None);
        assert!(h.scheduler.bot_unban_permanent("u").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bot_ban_matches_mention_forms() {
        let h = harness().await;

        h.scheduler.bot_ban("42").await.unwrap();
        let err = h.scheduler.bot_tempban("<@42>", MINUTE).await.unwrap_err();
        assert_eq!(err.reason(), "already_restricted");
        assert_eq!(h.scheduler.bot_ban("<@!42>").await.unwrap_err().reason(), "already_restricted");
        assert!(h.scheduler.store().snapshot().await.bot_tempbans.is_empty());

        h.scheduler.bot_warn("<@42>").await.unwrap();
        h.scheduler.bot_warn("<@42>").await.unwrap();
        assert_eq!(h.scheduler.bot_warn("<@42>").await.unwrap(), BotWarnOutcome::AlreadySuspended);
        assert_eq!(h.scheduler.timers().armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bot_unban_cancels_timer() {
        let h = harness().await;

        h.scheduler.bot_tempban("u", MINUTE).await.unwrap();
        assert_eq!(h.scheduler.timers().armed_count(), 1);
        h.scheduler.bot_unban("u").await.unwrap();
        assert_eq!(h.scheduler.timers().armed_count(), 0);
        assert_eq!(h.scheduler.bot_unban("u").await.unwrap_err().reason(), "not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_listings_report_schedule_state() {
        let policy = SchedulerPolicy {
            max_retries: 0,
            ..SchedulerPolicy::default()
        };
        let h = harness_with(FakeMembership::default(), policy).await;
        h.membership.fail_restores(1);

        h.scheduler.tempban("g", "u", MINUTE).await.unwrap();
        h.scheduler.mute("g", "v", MINUTE * 2).await.unwrap();

        let mutes = h.scheduler.active_mutes("g").await;
        assert_eq!(mutes.len(), 1);
        assert_eq!(mutes[0].remaining, MINUTE * 2);
        assert!(mutes[0].scheduled);

        tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;
        let tempbans = h.scheduler.active_tempbans("g").await;
        assert_eq!(tempbans.len(), 1);
        assert!(!tempbans[0].scheduled);
        assert_eq!(tempbans[0].remaining, Duration::ZERO);
        assert_eq!(h.membership.calls().last().map(|(_, c)| c.clone()), Some(Call::Add {
            scope: "g".to_string(),
            subject: "u".to_string(),
        }));
    }
}
