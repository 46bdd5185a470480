//! Expiry handling
//!
//! Runs when a timer fires. Tempbans restore membership and retry failed
//! restorations on a fixed interval up to the retry budget; mutes and bot
//! tempbans are single-attempt removals.

use crate::SCHEDULER_TARGET;
use crate::moderation::entry::{RestrictionKind, SchedulerKey};
use crate::moderation::scheduler::ModerationScheduler;
use crate::moderation::store::CollectionKind;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a fired timer ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// Entry removed, and membership restored for tempbans
    Succeeded,
    /// Restoration failed and was rescheduled
    RetryPending { attempts: u32 },
    /// Restoration failed with the retry budget spent; the entry stays
    GivenUp { attempts: u32 },
    /// The entry was already gone, e.g. lifted by an operator
    Released,
    /// The entry could not be removed from storage
    StorageFailed,
}

impl ModerationScheduler {
    /// Arm the expiry handler for `key`
    pub(crate) fn arm_expiry(&self, key: SchedulerKey, delay: Duration) {
        let scheduler = self.clone();
        let task_key = key.clone();
        self.inner.timers.arm(key, delay, async move {
            scheduler.expire(task_key).await;
        });
    }

    /// Run the expiry handler for `key` now
    pub async fn expire(&self, key: SchedulerKey) -> ExpiryOutcome {
        let outcome = match key.kind {
            RestrictionKind::Tempban => self.expire_tempban(&key).await,
            RestrictionKind::Mute => self.expire_mute(&key).await,
            RestrictionKind::BotTempban => self.expire_bot_tempban(&key).await,
        };
        debug!(target: SCHEDULER_TARGET, key = %key, ?outcome, "Expiry handled");
        outcome
    }

    async fn expire_tempban(&self, key: &SchedulerKey) -> ExpiryOutcome {
        // The expiry instant identifies the entry this timer was armed for
        let (attempts, expires_at) = {
            let state = self.inner.store.lock().await;
            match state.get(key) {
                Some(entry) => (entry.attempts, entry.expires_at),
                None => return ExpiryOutcome::Released,
            }
        };

        // The store is not held across the restore call
        let restored = self
            .inner
            .membership
            .add_member(&key.scope_id, &key.subject_id)
            .await;

        let mut state = self.inner.store.lock().await;
        if state.get(key).is_none_or(|entry| entry.expires_at != expires_at) {
            info!(target: SCHEDULER_TARGET, key = %key, event = "tempban_released_in_flight", "Tempban lifted or replaced while restoring");
            return ExpiryOutcome::Released;
        }

        match restored {
            Ok(()) => {
                state.remove(key);
                if state.save(CollectionKind::Tempbans).await.is_err() {
                    return ExpiryOutcome::StorageFailed;
                }
                drop(state);

                info!(target: SCHEDULER_TARGET, key = %key, attempts, event = "tempban_expired", "Tempban expired, membership restored");
                self.notify(
                    &key.scope_id,
                    format!("The tempban on {} has expired and they may rejoin.", key.subject_id),
                    &key.subject_id,
                );
                ExpiryOutcome::Succeeded
            }
            Err(e) if attempts < self.inner.policy.max_retries => {
                let attempts = attempts + 1;
                if let Some(entry) = state.get_mut(key) {
                    entry.attempts = attempts;
                }
                if state.save(CollectionKind::Tempbans).await.is_err() {
                    // Keep counting in memory so the budget holds while storage is down
                    if let Some(entry) = state.get_mut(key) {
                        entry.attempts = attempts;
                    }
                }
                let interval = self.inner.policy.retry_interval;
                self.arm_expiry(key.clone(), interval);

                warn!(
                    target: SCHEDULER_TARGET,
                    key = %key,
                    attempts,
                    max_retries = self.inner.policy.max_retries,
                    retry_in_secs = interval.as_secs(),
                    error = %e,
                    event = "tempban_retry",
                    "Failed to restore membership, retrying"
                );
                ExpiryOutcome::RetryPending { attempts }
            }
            Err(e) => {
                error!(
                    target: SCHEDULER_TARGET,
                    key = %key,
                    attempts,
                    error = %e,
                    event = "tempban_given_up",
                    "Failed to restore membership, giving up"
                );
                ExpiryOutcome::GivenUp { attempts }
            }
        }
    }

    async fn expire_mute(&self, key: &SchedulerKey) -> ExpiryOutcome {
        let mut state = self.inner.store.lock().await;
        if state.remove(key).is_none() {
            return ExpiryOutcome::Released;
        }
        if state.save(CollectionKind::Mutes).await.is_err() {
            return ExpiryOutcome::StorageFailed;
        }
        drop(state);

        info!(target: SCHEDULER_TARGET, key = %key, event = "mute_expired", "Mute expired");
        self.notify(
            &key.scope_id,
            format!("The mute on {} has expired.", key.subject_id),
            &key.subject_id,
        );
        ExpiryOutcome::Succeeded
    }

    async fn expire_bot_tempban(&self, key: &SchedulerKey) -> ExpiryOutcome {
        let mut state = self.inner.store.lock().await;
        if state.remove(key).is_none() {
            return ExpiryOutcome::Released;
        }
        if let Err(e) = state.save(CollectionKind::BotTempbans).await {
            error!(target: SCHEDULER_TARGET, key = %key, error = %e, event = "bot_tempban_expiry_failed", "Could not persist bot tempban expiry");
            return ExpiryOutcome::StorageFailed;
        }

        info!(target: SCHEDULER_TARGET, key = %key, event = "bot_tempban_expired", "Bot suspension expired");
        ExpiryOutcome::Succeeded
    }

    /// Fire-and-forget notification; failures are logged
    fn notify(&self, scope_id: &str, text: String, subject_id: &str) {
        let membership = self.inner.membership.clone();
        let scope_id = scope_id.to_string();
        let mentions = vec![subject_id.to_string()];
        tokio::spawn(async move {
            if let Err(e) = membership.notify(&scope_id, &text, &mentions).await {
                warn!(target: SCHEDULER_TARGET, scope = %scope_id, error = %e, event = "notify_failed", "Failed to send expiry notification");
            }
        });
    }
}
