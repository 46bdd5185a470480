//! Startup: load persisted state and re-arm pending timers

use crate::SCHEDULER_TARGET;
use crate::moderation::entry::{ModerationEntry, SchedulerKey};
use crate::moderation::scheduler::{Collaborators, ModerationScheduler, SchedulerPolicy, delay_until};
use crate::moderation::store::{ModerationStore, StorageBackend};
use std::sync::Arc;
use tracing::{info, warn};

/// What the startup pass found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RehydrationReport {
    /// Keys re-armed with their remaining delay
    pub armed: Vec<SchedulerKey>,
    /// Entries already past expiry; left in storage without a timer
    pub stale: Vec<(SchedulerKey, ModerationEntry)>,
}

impl ModerationScheduler {
    /// Load the store and re-arm every pending entry
    ///
    /// Returns only after every timer is armed, so no command can race the pass.
    pub async fn start(
        backend: Arc<dyn StorageBackend>,
        collaborators: Collaborators,
        policy: SchedulerPolicy,
    ) -> (Self, RehydrationReport) {
        let store = ModerationStore::load(backend).await;
        let scheduler = Self::new(store, collaborators, policy);
        let report = scheduler.rehydrate().await;
        (scheduler, report)
    }

    async fn rehydrate(&self) -> RehydrationReport {
        let now = self.now_millis();
        // Hold the lock for the whole pass
        let state = self.inner.store.lock().await;
        let mut report = RehydrationReport::default();

        for (key, entry) in state.timed_entries() {
            if entry.is_expired(now) {
                warn!(
                    target: SCHEDULER_TARGET,
                    key = %key,
                    expires_at = entry.expires_at,
                    attempts = entry.attempts,
                    event = "stale_entry",
                    "Entry expired while offline, not re-armed"
                );
                report.stale.push((key, entry));
            } else {
                self.arm_expiry(key.clone(), delay_until(&entry, now));
                report.armed.push(key);
            }
        }
        drop(state);

        info!(
            target: SCHEDULER_TARGET,
            armed = report.armed.len(),
            stale = report.stale.len(),
            "Rehydration complete"
        );
        report
    }
}
