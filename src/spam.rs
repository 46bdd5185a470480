//! Message flood detection
//!
//! Keeps a sliding window of message times per (guild, user). A user who fills the
//! window is reported once per cooldown; the caller turns that into a warn.

use crate::config::SpamConfig;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
struct SpamWindow {
    timestamps: VecDeque<i64>,
    last_warn_at: Option<i64>,
}

impl SpamWindow {
    /// Nothing left in the window and no cooldown running
    fn is_idle(&self, now_ms: i64, config: &SpamConfig) -> bool {
        let cutoff = now_ms - config.window_ms;
        self.timestamps.back().is_none_or(|t| *t < cutoff)
            && self.last_warn_at.is_none_or(|at| now_ms - at > config.warn_cooldown_ms)
    }
}

/// Per-scope, per-subject flood tracker
#[derive(Debug, Default)]
pub struct SpamTracker {
    config: SpamConfig,
    windows: DashMap<(String, String), SpamWindow>,
    last_sweep_ms: AtomicI64,
}

impl SpamTracker {
    #[must_use]
    pub fn new(config: SpamConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            last_sweep_ms: AtomicI64::new(0),
        }
    }

    /// Record a message and report whether it should trigger an automatic warn
    ///
    /// Idle windows are swept at most once per window length.
    pub fn record(&self, scope_id: &str, subject_id: &str, now_ms: i64) -> bool {
        let last_sweep = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms - last_sweep >= self.config.window_ms
            && self
                .last_sweep_ms
                .compare_exchange(last_sweep, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.sweep(now_ms);
        }

        let mut window = self
            .windows
            .entry((scope_id.to_string(), subject_id.to_string()))
            .or_default();

        window.timestamps.push_back(now_ms);
        let cutoff = now_ms - self.config.window_ms;
        while window.timestamps.front().is_some_and(|t| *t < cutoff) {
            window.timestamps.pop_front();
        }

        let flooding = window.timestamps.len() >= self.config.max_messages.max(1);
        let cooled_down = window
            .last_warn_at
            .is_none_or(|at| now_ms - at > self.config.warn_cooldown_ms);
        if flooding && cooled_down {
            window.last_warn_at = Some(now_ms);
            return true;
        }
        false
    }

    /// Drop windows with no recent messages and no running cooldown
    pub fn sweep(&self, now_ms: i64) {
        self.windows.retain(|_, window| !window.is_idle(now_ms, &self.config));
    }

    /// Drop every window belonging to a scope
    pub fn forget_scope(&self, scope_id: &str) {
        self.windows.retain(|(scope, _), _| scope != scope_id);
    }

    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SpamTracker {
        SpamTracker::new(SpamConfig::default())
    }

    #[test]
    fn test_flood_triggers_on_fifth_message() {
        let spam = tracker();
        let hits: Vec<bool> = (0..5).map(|i| spam.record("g", "u", i * 1_000)).collect();
        assert_eq!(hits, vec![false, false, false, false, true]);
    }

    #[test]
    fn test_slow_messages_never_trigger() {
        let spam = tracker();
        for i in 0..20 {
            assert!(!spam.record("g", "u", i * 2_000));
        }
    }

    #[test]
    fn test_cooldown_between_warns() {
        let spam = tracker();
        for i in 0..5 {
            spam.record("g", "u", i * 100);
        }
        // Still flooding, but inside the cooldown
        assert!(!spam.record("g", "u", 1_000));
        assert!(!spam.record("g", "u", 10_400));
        // Past the cooldown with a full window
        for i in 0..3 {
            spam.record("g", "u", 10_500 + i * 100);
        }
        assert!(spam.record("g", "u", 11_000));
    }

    #[test]
    fn test_subjects_and_scopes_are_independent() {
        let spam = tracker();
        for i in 0..4 {
            spam.record("g", "a", i);
            spam.record("g", "b", i);
            spam.record("h", "a", i);
        }
        assert!(spam.record("g", "a", 10));
        assert!(!spam.record("h", "b", 10));
        assert_eq!(spam.tracked(), 4);

        spam.forget_scope("g");
        assert_eq!(spam.tracked(), 2);
    }

    #[test]
    fn test_idle_windows_are_evicted() {
        let spam = tracker();
        for user in 0..50 {
            spam.record("g", &user.to_string(), 1_000);
        }
        assert_eq!(spam.tracked(), 50);

        // Long after every window emptied, the next message sweeps them
        spam.record("g", "late", 60_000);
        assert_eq!(spam.tracked(), 1);
    }

    #[test]
    fn test_sweep_keeps_cooldowns() {
        let spam = tracker();
        for i in 0..5 {
            spam.record("g", "u", i * 100);
        }
        // Window empty but the warn cooldown is still running
        spam.sweep(9_000);
        assert_eq!(spam.tracked(), 1);
        spam.sweep(20_000);
        assert_eq!(spam.tracked(), 0);
    }
}
