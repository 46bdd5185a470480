//! Moderation entries and the persisted collections that hold them
//!
//! An entry describes one active time-bounded restriction. Entries are grouped
//! by scope (guild) for group-level kinds and kept flat for bot-level kinds.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Kind of time-bounded restriction
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
pub enum RestrictionKind {
    /// Messages from the subject are removed until expiry
    #[display("mute")]
    Mute,
    /// The subject is removed from the group and restored at expiry
    #[display("tempban")]
    Tempban,
    /// The subject may not use bot commands until expiry (process-wide)
    #[display("bot-tempban")]
    BotTempban,
}

impl RestrictionKind {
    /// Bot-level kinds are not bound to a group
    #[must_use]
    pub fn is_scoped(self) -> bool {
        !matches!(self, Self::BotTempban)
    }
}

/// One active restriction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationEntry {
    /// Canonical id of the restricted party
    pub subject_id: String,
    /// Epoch milliseconds at which the entry becomes eligible to clear
    pub expires_at: i64,
    /// Failed restore attempts so far (tempbans only)
    #[serde(default)]
    pub attempts: u32,
}

impl ModerationEntry {
    pub fn new(subject_id: impl Into<String>, expires_at: i64) -> Self {
        Self {
            subject_id: subject_id.into(),
            expires_at,
            attempts: 0,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }

    /// Milliseconds left before expiry, never negative
    #[must_use]
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        (self.expires_at - now_ms).max(0)
    }
}

/// Handle used to locate, replace and cancel a timer
///
/// Bot-level keys carry an empty scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{kind}|{scope_id}|{subject_id}")]
pub struct SchedulerKey {
    pub kind: RestrictionKind,
    pub scope_id: String,
    pub subject_id: String,
}

impl SchedulerKey {
    pub fn new(kind: RestrictionKind, scope_id: &str, subject_id: &str) -> Self {
        let scope_id = if kind.is_scoped() {
            scope_id.to_string()
        } else {
            String::new()
        };
        Self {
            kind,
            scope_id,
            subject_id: subject_id.to_string(),
        }
    }

    pub fn mute(scope_id: &str, subject_id: &str) -> Self {
        Self::new(RestrictionKind::Mute, scope_id, subject_id)
    }

    pub fn tempban(scope_id: &str, subject_id: &str) -> Self {
        Self::new(RestrictionKind::Tempban, scope_id, subject_id)
    }

    pub fn bot_tempban(subject_id: &str) -> Self {
        Self::new(RestrictionKind::BotTempban, "", subject_id)
    }
}

/// Entries of one group-level kind, keyed by scope
pub type ScopedEntries = BTreeMap<String, Vec<ModerationEntry>>;

/// Warn counters for groups and for the bot itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarnBook {
    /// scope -> subject -> count
    #[serde(default)]
    pub groups: BTreeMap<String, BTreeMap<String, u32>>,
    /// subject -> count, for bot-level warns
    #[serde(default)]
    pub bot: BTreeMap<String, u32>,
}

impl WarnBook {
    /// Increment a counter and return the new value
    pub fn increment(&mut self, scope_id: Option<&str>, subject_id: &str) -> u32 {
        let counters = match scope_id {
            Some(scope_id) => self.groups.entry(scope_id.to_string()).or_default(),
            None => &mut self.bot,
        };
        let count = counters.entry(subject_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    #[must_use]
    pub fn count(&self, scope_id: Option<&str>, subject_id: &str) -> u32 {
        let counters = match scope_id {
            Some(scope_id) => self.groups.get(scope_id),
            None => Some(&self.bot),
        };
        counters
            .and_then(|c| c.get(subject_id))
            .copied()
            .unwrap_or(0)
    }

    /// Reset a counter, returning the previous value if there was one
    pub fn reset(&mut self, scope_id: Option<&str>, subject_id: &str) -> Option<u32> {
        match scope_id {
            Some(scope_id) => {
                let counters = self.groups.get_mut(scope_id)?;
                let previous = counters.remove(subject_id);
                if counters.is_empty() {
                    self.groups.remove(scope_id);
                }
                previous
            }
            None => self.bot.remove(subject_id),
        }
    }
}

/// The full persisted moderation state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collections {
    pub mutes: ScopedEntries,
    pub tempbans: ScopedEntries,
    pub bot_tempbans: Vec<ModerationEntry>,
    pub bot_bans: BTreeSet<String>,
    pub warns: WarnBook,
}

impl Collections {
    /// Entries of a kind within a scope
    #[must_use]
    pub fn entries(&self, kind: RestrictionKind, scope_id: &str) -> &[ModerationEntry] {
        let list = match kind {
            RestrictionKind::Mute => self.mutes.get(scope_id),
            RestrictionKind::Tempban => self.tempbans.get(scope_id),
            RestrictionKind::BotTempban => Some(&self.bot_tempbans),
        };
        list.map_or(&[], Vec::as_slice)
    }

    /// Look up the entry a key points at
    #[must_use]
    pub fn get(&self, key: &SchedulerKey) -> Option<&ModerationEntry> {
        self.entries(key.kind, &key.scope_id)
            .iter()
            .find(|e| e.subject_id == key.subject_id)
    }

    pub fn get_mut(&mut self, key: &SchedulerKey) -> Option<&mut ModerationEntry> {
        self.list_mut(key.kind, &key.scope_id)?
            .iter_mut()
            .find(|e| e.subject_id == key.subject_id)
    }

    /// First entry in the scope whose subject satisfies `matches`
    pub fn find<F>(&self, kind: RestrictionKind, scope_id: &str, matches: F) -> Option<&ModerationEntry>
    where
        F: Fn(&str) -> bool,
    {
        self.entries(kind, scope_id)
            .iter()
            .find(|e| matches(&e.subject_id))
    }

    /// Insert an entry, replacing any entry for the same key
    pub fn insert(&mut self, kind: RestrictionKind, scope_id: &str, entry: ModerationEntry) {
        let list = match kind {
            RestrictionKind::Mute => self.mutes.entry(scope_id.to_string()).or_default(),
            RestrictionKind::Tempban => self.tempbans.entry(scope_id.to_string()).or_default(),
            RestrictionKind::BotTempban => &mut self.bot_tempbans,
        };
        list.retain(|e| e.subject_id != entry.subject_id);
        list.push(entry);
    }

    /// Remove the entry a key points at; empty scopes are dropped
    pub fn remove(&mut self, key: &SchedulerKey) -> Option<ModerationEntry> {
        let list = self.list_mut(key.kind, &key.scope_id)?;
        let index = list.iter().position(|e| e.subject_id == key.subject_id)?;
        let removed = list.remove(index);
        if list.is_empty() {
            match key.kind {
                RestrictionKind::Mute => {
                    self.mutes.remove(&key.scope_id);
                }
                RestrictionKind::Tempban => {
                    self.tempbans.remove(&key.scope_id);
                }
                RestrictionKind::BotTempban => {}
            }
        }
        Some(removed)
    }

    /// Every timer-bearing entry with its key
    #[must_use]
    pub fn timed_entries(&self) -> Vec<(SchedulerKey, ModerationEntry)> {
        let scoped = |kind: RestrictionKind, map: &ScopedEntries| {
            map.iter()
                .flat_map(move |(scope_id, list)| {
                    list.iter()
                        .map(move |e| (SchedulerKey::new(kind, scope_id, &e.subject_id), e.clone()))
                })
                .collect::<Vec<_>>()
        };

        let mut out = scoped(RestrictionKind::Mute, &self.mutes);
        out.extend(scoped(RestrictionKind::Tempban, &self.tempbans));
        out.extend(
            self.bot_tempbans
                .iter()
                .map(|e| (SchedulerKey::bot_tempban(&e.subject_id), e.clone())),
        );
        out
    }

    fn list_mut(&mut self, kind: RestrictionKind, scope_id: &str) -> Option<&mut Vec<ModerationEntry>> {
        match kind {
            RestrictionKind::Mute => self.mutes.get_mut(scope_id),
            RestrictionKind::Tempban => self.tempbans.get_mut(scope_id),
            RestrictionKind::BotTempban => Some(&mut self.bot_tempbans),
        }
    }
}
