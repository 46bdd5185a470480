//! Timer registry
//!
//! Holds at most one pending delayed action per [`SchedulerKey`]. Arming a key
//! that already has a timer aborts the old one first. A timer removes itself from
//! the registry the moment it fires, before its action runs, so the action is free
//! to re-arm the same key.

use crate::SCHEDULER_TARGET;
use crate::moderation::entry::SchedulerKey;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::AbortHandle;
use tokio::time::{Duration, Instant};
use tracing::trace;

struct ArmedTimer {
    generation: u64,
    deadline: Instant,
    handle: AbortHandle,
}

#[derive(Default)]
struct RegistryInner {
    timers: DashMap<SchedulerKey, ArmedTimer>,
    generation: AtomicU64,
}

/// Process-wide map from key to a single cancellable delayed action
#[derive(Clone, Default)]
pub struct TimerRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("armed", &self.armed_count())
            .finish()
    }
}

impl TimerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` to run after `delay`, replacing any timer for `key`
    ///
    /// A zero delay fires on the next scheduler tick.
    pub fn arm<F>(&self, key: SchedulerKey, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;

        // The shard stays locked until the new timer is recorded, so a task that
        // fires immediately cannot release itself before it is registered.
        let slot = self.inner.timers.entry(key.clone());
        let registry = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            registry.release(&task_key, generation);
            action.await;
        })
        .abort_handle();

        let timer = ArmedTimer {
            generation,
            deadline,
            handle,
        };
        match slot {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(timer);
                previous.handle.abort();
                trace!(target: SCHEDULER_TARGET, key = %key, ?delay, "Timer replaced");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(timer);
                trace!(target: SCHEDULER_TARGET, key = %key, ?delay, "Timer armed");
            }
        }
    }

    /// Abort and forget the timer for `key`; returns whether one was armed
    pub fn cancel(&self, key: &SchedulerKey) -> bool {
        match self.inner.timers.remove(key) {
            Some((_, timer)) => {
                timer.handle.abort();
                trace!(target: SCHEDULER_TARGET, key = %key, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Abort every pending timer
    pub fn cancel_all(&self) {
        self.inner.timers.retain(|_, timer| {
            timer.handle.abort();
            false
        });
    }

    #[must_use]
    pub fn is_armed(&self, key: &SchedulerKey) -> bool {
        self.inner.timers.contains_key(key)
    }

    /// When the timer for `key` is due to fire
    #[must_use]
    pub fn deadline(&self, key: &SchedulerKey) -> Option<Instant> {
        self.inner.timers.get(key).map(|t| t.deadline)
    }

    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.inner.timers.len()
    }

    fn release(&self, key: &SchedulerKey, generation: u64) {
        self.inner
            .timers
            .remove_if(key, |_, timer| timer.generation == generation);
    }
}
