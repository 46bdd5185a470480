//! Fakes shared by the scheduler tests

use crate::moderation::external::{Clock, MembershipService, PassthroughIdentity};
use crate::moderation::scheduler::{Collaborators, ModerationScheduler, SchedulerPolicy};
use crate::moderation::store::MemoryBackend;
use crate::moderation::{ModerationError, ModerationResult, RehydrationReport};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Epoch milliseconds the fake clock starts at
pub(crate) const EPOCH_BASE: i64 = 1_700_000_000_000;

/// Wall clock that follows tokio's (pausable) clock
#[derive(Debug, Clone)]
pub(crate) struct TestClock {
    start: Instant,
}

impl TestClock {
    pub(crate) fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for TestClock {
    fn now_millis(&self) -> i64 {
        EPOCH_BASE + i64::try_from(self.start.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Remove { scope: String, subject: String },
    Add { scope: String, subject: String },
    Notify { scope: String, text: String, mentions: Vec<String> },
}

/// Membership service recording every call with the time it happened
#[derive(Debug)]
pub(crate) struct FakeMembership {
    start: Instant,
    calls: Mutex<Vec<(Duration, Call)>>,
    restore_failures: AtomicU32,
    fail_removals: AtomicBool,
}

impl Default for FakeMembership {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            calls: Mutex::new(Vec::new()),
            restore_failures: AtomicU32::new(0),
            fail_removals: AtomicBool::new(false),
        }
    }
}

impl FakeMembership {
    /// Fail the next `count` restores
    pub(crate) fn fail_restores(&self, count: u32) {
        self.restore_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_removals(&self, fail: bool) {
        self.fail_removals.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<(Duration, Call)> {
        self.calls.lock().unwrap().clone()
    }

    /// When each restore was attempted
    pub(crate) fn restores(&self) -> Vec<Duration> {
        self.calls()
            .into_iter()
            .filter_map(|(at, call)| matches!(call, Call::Add { .. }).then_some(at))
            .collect()
    }

    pub(crate) fn removals(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|(_, call)| match call {
                Call::Remove { scope, subject } => Some((scope, subject)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn notifications(&self) -> Vec<(Duration, String)> {
        self.calls()
            .into_iter()
            .filter_map(|(at, call)| match call {
                Call::Notify { text, .. } => Some((at, text)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push((self.start.elapsed(), call));
    }
}

#[async_trait]
impl MembershipService for FakeMembership {
    async fn remove_member(&self, scope_id: &str, subject_id: &str) -> ModerationResult<()> {
        self.record(Call::Remove {
            scope: scope_id.to_string(),
            subject: subject_id.to_string(),
        });
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(ModerationError::ExternalActionFailed("missing permissions".to_string()));
        }
        Ok(())
    }

    async fn add_member(&self, scope_id: &str, subject_id: &str) -> ModerationResult<()> {
        self.record(Call::Add {
            scope: scope_id.to_string(),
            subject: subject_id.to_string(),
        });
        let failing = self
            .restore_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ModerationError::ExternalActionFailed("service unavailable".to_string()));
        }
        Ok(())
    }

    async fn notify(&self, scope_id: &str, text: &str, mentions: &[String]) -> ModerationResult<()> {
        self.record(Call::Notify {
            scope: scope_id.to_string(),
            text: text.to_string(),
            mentions: mentions.to_vec(),
        });
        Ok(())
    }
}

pub(crate) struct Harness<M> {
    pub(crate) scheduler: ModerationScheduler,
    pub(crate) membership: Arc<M>,
    pub(crate) backend: MemoryBackend,
    pub(crate) clock: Arc<TestClock>,
    pub(crate) report: RehydrationReport,
}

impl<M: MembershipService + 'static> Harness<M> {
    /// Stop this scheduler and start a fresh one over the same storage
    pub(crate) async fn restart(self) -> Self {
        self.scheduler.shutdown();
        start(self.membership, self.backend, self.clock, self.scheduler.policy()).await
    }
}

pub(crate) async fn harness() -> Harness<FakeMembership> {
    harness_with(FakeMembership::default(), SchedulerPolicy::default()).await
}

pub(crate) async fn harness_with(membership: FakeMembership, policy: SchedulerPolicy) -> Harness<FakeMembership> {
    start(Arc::new(membership), MemoryBackend::new(), Arc::new(TestClock::new()), policy).await
}

pub(crate) async fn harness_with_service<M: MembershipService + 'static>(membership: Arc<M>) -> Harness<M> {
    start(membership, MemoryBackend::new(), Arc::new(TestClock::new()), SchedulerPolicy::default()).await
}

/// Start over storage that was prepared beforehand
pub(crate) async fn harness_on(backend: MemoryBackend, clock: Arc<TestClock>) -> Harness<FakeMembership> {
    start(Arc::new(FakeMembership::default()), backend, clock, SchedulerPolicy::default()).await
}

async fn start<M: MembershipService + 'static>(
    membership: Arc<M>,
    backend: MemoryBackend,
    clock: Arc<TestClock>,
    policy: SchedulerPolicy,
) -> Harness<M> {
    let collaborators = Collaborators {
        membership: membership.clone(),
        identity: Arc::new(PassthroughIdentity),
        clock: clock.clone(),
    };
    let (scheduler, report) = ModerationScheduler::start(Arc::new(backend.clone()), collaborators, policy).await;
    Harness {
        scheduler,
        membership,
        backend,
        clock,
        report,
    }
}
