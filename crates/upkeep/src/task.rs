//! Task abstraction for the service thread.
//!
//! A [`ServiceTask`] pairs a diagnostic name with a [`Job`] — the actual
//! recurring work. Tasks are created and owned by collaborators for their
//! whole lifetime; the scheduler only links them into and out of its queue
//! via shared [`Arc`] handles, it never owns their storage exclusively.
//!
//! A task is registered with at most one service thread, ever. Registration
//! binds a non-owning back-reference to that thread so the task can route
//! [`TaskContext::schedule`] calls back to the correct queue.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;

use tracing::warn;

use crate::service::Shared;

/// Due time reserved for the queue sentinel. Real tasks are always scheduled
/// strictly below this, so an insertion scan terminates in front of the
/// sentinel.
pub(crate) const SENTINEL_DUE_MS: u64 = u64::MAX;

// ── Job ─────────────────────────────────────────────────────────────────────

/// A unit of recurring work executed by a service thread.
///
/// `execute` runs on the worker with the scheduler monitor released, so it
/// may freely call back into the scheduler through the provided context. To
/// run again, call [`TaskContext::schedule`] with the desired delay before
/// returning; a task that does not reschedule itself simply stays registered
/// but dormant.
pub trait Job: Send {
    /// Do the actual work for the task.
    fn execute(&mut self, ctx: &mut TaskContext<'_>);
}

/// Closures are jobs: `ServiceTask::new("tick", |ctx: &mut TaskContext| ...)`.
impl<F> Job for F
where
    F: FnMut(&mut TaskContext<'_>) + Send,
{
    fn execute(&mut self, ctx: &mut TaskContext<'_>) {
        self(ctx);
    }
}

/// The sentinel's job. Reaching it means the queue logic is broken, so it
/// fails fast instead of silently doing nothing.
struct SentinelJob;

impl Job for SentinelJob {
    fn execute(&mut self, _ctx: &mut TaskContext<'_>) {
        unreachable!("sentinel task must never execute");
    }
}

// ── TaskContext ──────────────────────────────────────────────────────────────

/// Execution context handed to [`Job::execute`].
///
/// Exposes the owning scheduler's clock and the rescheduling entry point for
/// the task currently running.
pub struct TaskContext<'a> {
    shared: &'a Arc<Shared>,
    task: &'a Arc<ServiceTask>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(shared: &'a Arc<Shared>, task: &'a Arc<ServiceTask>) -> Self {
        Self { shared, task }
    }

    /// Current scheduler time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.shared.clock().now_ms()
    }

    /// Name of the task currently executing.
    #[must_use]
    pub fn task_name(&self) -> &str {
        self.task.name()
    }

    /// Re-insert the running task into its owner's queue, due `delay` from
    /// now. The due time is computed at the moment of this call, not when
    /// `execute` returns.
    ///
    /// # Panics
    ///
    /// Panics if called more than once during a single execution: a task may
    /// appear in the queue at most once.
    pub fn schedule(&self, delay: Duration) {
        self.task.schedule(delay);
    }
}

// ── ServiceTask ──────────────────────────────────────────────────────────────

/// A recurring task: a named [`Job`] plus the scheduling state managed by the
/// service thread it is registered with.
///
/// Created via [`ServiceTask::new`], registered once via
/// [`ServiceThread::register_task`](crate::service::ServiceThread::register_task),
/// and thereafter driven entirely by the worker loop (and by its own
/// [`TaskContext::schedule`] calls).
pub struct ServiceTask {
    name: String,
    /// Absolute due time in scheduler milliseconds. Written only while
    /// holding the owner's monitor.
    due_ms: AtomicU64,
    /// True while the task sits in its owner's queue.
    queued: AtomicBool,
    /// Back-reference to the owning service thread, set exactly once at
    /// registration.
    owner: OnceLock<Weak<Shared>>,
    sentinel: bool,
    job: Mutex<Box<dyn Job>>,
}

impl ServiceTask {
    /// Create a new, unregistered task.
    #[must_use]
    pub fn new(name: impl Into<String>, job: impl Job + 'static) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            due_ms: AtomicU64::new(0),
            queued: AtomicBool::new(false),
            owner: OnceLock::new(),
            sentinel: false,
            job: Mutex::new(Box::new(job)),
        })
    }

    /// The permanent queue tail: maximal due time, never popped, never
    /// executed.
    pub(crate) fn sentinel() -> Arc<Self> {
        Arc::new(Self {
            name: "sentinel".to_string(),
            due_ms: AtomicU64::new(SENTINEL_DUE_MS),
            // Permanently "queued" so add_ordered can never link it twice.
            queued: AtomicBool::new(true),
            owner: OnceLock::new(),
            sentinel: true,
            job: Mutex::new(Box::new(SentinelJob)),
        })
    }

    /// Diagnostic name. Not used for ordering or equality.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute due time in scheduler milliseconds.
    #[must_use]
    pub fn due_ms(&self) -> u64 {
        self.due_ms.load(Ordering::SeqCst)
    }

    /// Whether this task has been registered with a service thread.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.owner.get().is_some()
    }

    /// Re-insert this task into its owner's queue, due `delay` from now.
    ///
    /// Intended to be called from within [`Job::execute`] (usually via
    /// [`TaskContext::schedule`]). The initial delay is expressed as the
    /// `register_task` argument instead.
    ///
    /// # Panics
    ///
    /// Panics if the task has never been registered — that is a programming
    /// error in the collaborator, not a recoverable condition.
    pub fn schedule(self: &Arc<Self>, delay: Duration) {
        let Some(owner) = self.owner.get() else {
            panic!("task '{}' scheduled before registration", self.name);
        };
        if let Some(shared) = owner.upgrade() {
            shared.schedule_task(self, delay);
        } else {
            warn!(
                task = %self.name,
                "schedule ignored: owning service thread is gone"
            );
        }
    }

    pub(crate) fn is_sentinel(&self) -> bool {
        self.sentinel
    }

    pub(crate) fn set_due_ms(&self, due_ms: u64) {
        self.due_ms.store(due_ms, Ordering::SeqCst);
    }

    /// Flag the task as queued; returns the previous value.
    pub(crate) fn mark_queued(&self) -> bool {
        self.queued.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn clear_queued(&self) {
        self.queued.store(false, Ordering::SeqCst);
    }

    /// Bind the owning service thread. Fails if already bound.
    pub(crate) fn bind_owner(&self, owner: Weak<Shared>) -> Result<(), ()> {
        self.owner.set(owner).map_err(|_| ())
    }

    pub(crate) fn lock_job(&self) -> MutexGuard<'_, Box<dyn Job>> {
        self.job.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ServiceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTask")
            .field("name", &self.name)
            .field("due_ms", &self.due_ms())
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_unregistered() {
        let task = ServiceTask::new("probe", |_: &mut TaskContext<'_>| {});
        assert_eq!(task.name(), "probe");
        assert_eq!(task.due_ms(), 0);
        assert!(!task.is_registered());
        assert!(!task.is_sentinel());
    }

    #[test]
    fn sentinel_has_maximal_due_time() {
        let sentinel = ServiceTask::sentinel();
        assert_eq!(sentinel.due_ms(), SENTINEL_DUE_MS);
        assert!(sentinel.is_sentinel());
        // Permanently queued: it can never be linked a second time.
        assert!(sentinel.mark_queued());
    }

    #[test]
    #[should_panic(expected = "scheduled before registration")]
    fn schedule_before_registration_is_fatal() {
        let task = ServiceTask::new("early", |_: &mut TaskContext<'_>| {});
        task.schedule(Duration::from_millis(10));
    }

    #[test]
    fn queued_flag_round_trips() {
        let task = ServiceTask::new("flag", |_: &mut TaskContext<'_>| {});
        assert!(!task.mark_queued());
        assert!(task.mark_queued());
        task.clear_queued();
        assert!(!task.mark_queued());
    }

    #[test]
    fn debug_format_names_the_task() {
        let task = ServiceTask::new("dbg", |_: &mut TaskContext<'_>| {});
        let text = format!("{task:?}");
        assert!(text.contains("dbg"));
    }
}
