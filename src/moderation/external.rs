//! Collaborators the scheduler calls out to

use crate::moderation::ModerationResult;
use async_trait::async_trait;

/// Group membership mutations and scope notifications
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipService: Send + Sync {
    /// Take the subject out of the scope
    async fn remove_member(&self, scope_id: &str, subject_id: &str) -> ModerationResult<()>;

    /// Take the subject out of the scope without keeping them out
    ///
    /// Platforms where removal is already non-sticky need not override this.
    async fn kick_member(&self, scope_id: &str, subject_id: &str) -> ModerationResult<()> {
        self.remove_member(scope_id, subject_id).await
    }

    /// Let the subject back into the scope
    async fn add_member(&self, scope_id: &str, subject_id: &str) -> ModerationResult<()>;

    /// Post a message to the scope, mentioning the given subjects
    async fn notify(&self, scope_id: &str, text: &str, mentions: &[String]) -> ModerationResult<()>;
}

/// Normalizes raw subject identifiers to their canonical form
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Canonical id for `raw`; resolving a canonical id returns it unchanged
    async fn resolve(&self, raw: &str) -> String;

    /// Whether two ids refer to the same subject
    ///
    /// Matches on exact equality or on equal digit sequences, so `<@42>` and `42`
    /// are the same subject.
    fn same_subject(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        let digits = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();
        let (a, b) = (digits(a), digits(b));
        !a.is_empty() && a == b
    }
}

/// Wall-clock source in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Identity resolver that only trims whitespace
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughIdentity;

#[async_trait]
impl IdentityResolver for PassthroughIdentity {
    async fn resolve(&self, raw: &str) -> String {
        raw.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_subject_digit_normalization() {
        let resolver = PassthroughIdentity;
        assert!(resolver.same_subject("42", "42"));
        assert!(resolver.same_subject("<@42>", "42"));
        assert!(resolver.same_subject("42@c.us", "42"));
        assert!(!resolver.same_subject("42", "420"));
        assert!(!resolver.same_subject("alice", "bob"));
        assert!(resolver.same_subject("alice", "alice"));
    }

    #[tokio::test]
    async fn test_passthrough_resolve_is_idempotent() {
        let resolver = PassthroughIdentity;
        let once = resolver.resolve(" 42 ").await;
        assert_eq!(once, "42");
        assert_eq!(resolver.resolve(&once).await, once);
    }

    #[test]
    fn test_system_clock_is_current() {
        let now = SystemClock.now_millis();
        assert!(now > 1_600_000_000_000);
    }
}
