//! The service thread: one dedicated background worker executing a set of
//! recurring, time-ordered tasks.
//!
//! The worker owns a [`TaskQueue`] guarded by a monitor (mutex + condvar).
//! Its loop drains every due task, executes each one with the monitor
//! released (so collaborators — including the running task itself — can
//! register and reschedule concurrently), then sleeps exactly until the next
//! deadline. A registration that produces a nearer deadline notifies the
//! monitor, so a stale sleep never delays new work. A stop request
//! interrupts any in-progress wait promptly and the worker joins cleanly.
//!
//! Task executions are strictly serialized: this thread never runs two
//! tasks concurrently, and tasks run in non-decreasing due-time order (FIFO
//! among equal due times).

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::queue::TaskQueue;
use crate::task::{SENTINEL_DUE_MS, ServiceTask, TaskContext};

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors from service thread lifecycle operations.
///
/// Programming errors (double registration, scheduling an unregistered task)
/// are not represented here — those fail fast with a panic, because they
/// signal a logic defect in a collaborator rather than a runtime condition.
#[derive(Debug, Error)]
pub enum ServiceThreadError {
    /// The worker thread could not be spawned.
    #[error("failed to spawn service thread: {0}")]
    Spawn(#[from] io::Error),

    /// The worker terminated by panicking (a task's `execute` panicked).
    #[error("service thread '{name}' panicked")]
    WorkerPanicked { name: String },
}

// ── Configuration ────────────────────────────────────────────────────────────

/// Configuration for a [`ServiceThread`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceThreadConfig {
    /// Worker thread name, visible in diagnostics and panic messages.
    pub name: String,

    /// Upper bound on a single timed wait. With only the sentinel queued the
    /// worker would otherwise sleep until the clock's maximum representable
    /// time; the cap keeps every wait bounded. Wakeups on registration and
    /// stop do not depend on it.
    pub max_wait: Duration,
}

impl Default for ServiceThreadConfig {
    fn default() -> Self {
        Self {
            name: "upkeep".to_string(),
            max_wait: Duration::from_secs(60),
        }
    }
}

// ── Lifecycle state ──────────────────────────────────────────────────────────

/// Lifecycle of the worker: entered left to right, never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Running,
    StopRequested,
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::StopRequested => write!(f, "stop_requested"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ── Diagnostics ──────────────────────────────────────────────────────────────

/// Serializable diagnostic snapshot of a [`ServiceThread`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceThreadStats {
    /// Worker thread name.
    pub name: String,
    /// Current lifecycle state.
    pub state: RunState,
    /// Real tasks currently queued (excludes the sentinel).
    pub queued_tasks: usize,
    /// Total task executions since start.
    pub tasks_executed: u64,
    /// Accumulated execution time across all task runs, in milliseconds.
    pub virtual_time_ms: u64,
}

// ── Shared state ─────────────────────────────────────────────────────────────

/// State shared between the worker, registrars, and running tasks.
///
/// The monitor guards the queue chain and the stop flag, and doubles as the
/// worker's sleep/wake signal. Everything that reads or mutates queue links
/// or due-time ordering holds it; `execute` runs with it released.
pub(crate) struct Shared {
    clock: Arc<dyn Clock>,
    monitor: Mutex<QueueState>,
    wakeup: Condvar,
    name: String,
    /// Accumulated execution time in nanoseconds. Diagnostics only; has no
    /// effect on scheduling.
    vtime_ns: AtomicU64,
    tasks_executed: AtomicU64,
}

struct QueueState {
    queue: TaskQueue,
    stop_requested: bool,
    state: RunState,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.monitor.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Insert a registered task at `now + delay` and wake the worker so it
    /// recomputes its wait if this is now the nearest deadline.
    pub(crate) fn schedule_task(&self, task: &Arc<ServiceTask>, delay: Duration) {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let now = self.clock.now_ms();
        // Strictly below the sentinel's due time so the insertion scan
        // always terminates in front of it.
        let due = now.saturating_add(delay_ms).min(SENTINEL_DUE_MS - 1);
        {
            let mut state = self.lock();
            task.set_due_ms(due);
            state.queue.add_ordered(Arc::clone(task));
            trace!(
                thread = %self.name,
                task = task.name(),
                due_ms = due,
                "task scheduled"
            );
        }
        self.wakeup.notify_all();
    }
}

// ── ServiceThread ────────────────────────────────────────────────────────────

/// A dedicated background worker draining a time-ordered task queue.
///
/// Started once, stopped once, never restarted. Dropping the handle stops
/// the worker as well.
///
/// # Example
///
/// ```ignore
/// let thread = ServiceThread::start(ServiceThreadConfig::default())?;
/// let tick = ServiceTask::new("tick", |ctx: &mut TaskContext| {
///     do_periodic_work();
///     ctx.schedule(Duration::from_secs(5)); // run again in 5s
/// });
/// thread.register_task(&tick, Duration::ZERO); // first run: immediately
/// ```
pub struct ServiceThread {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ServiceThread {
    /// Start a service thread with the default monotonic clock.
    pub fn start(config: ServiceThreadConfig) -> Result<Self, ServiceThreadError> {
        Self::start_with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Start a service thread with an explicit clock. One consistent,
    /// non-decreasing clock must be used for the instance's whole lifetime.
    pub fn start_with_clock(
        config: ServiceThreadConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceThreadError> {
        let shared = Arc::new(Shared {
            clock,
            monitor: Mutex::new(QueueState {
                queue: TaskQueue::new(),
                stop_requested: false,
                state: RunState::Created,
            }),
            wakeup: Condvar::new(),
            name: config.name.clone(),
            vtime_ns: AtomicU64::new(0),
            tasks_executed: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let max_wait = config.max_wait;
        let worker = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || run_service(&worker_shared, max_wait))?;

        info!(thread = %config.name, "service thread started");
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Register `task` and schedule its first execution after `delay`.
    ///
    /// Callable from any thread, any time after the scheduler exists. A zero
    /// delay means "due now"; an already-elapsed due time is drained on the
    /// next cycle. This is the only path by which a task enters the queue;
    /// subsequent executions are requested by the task itself via
    /// [`TaskContext::schedule`].
    ///
    /// # Panics
    ///
    /// Panics if `task` is already registered (with this or any other
    /// service thread). Double registration is a logic bug in the
    /// collaborator and is caught early rather than silently duplicated.
    pub fn register_task(&self, task: &Arc<ServiceTask>, delay: Duration) {
        if task.bind_owner(Arc::downgrade(&self.shared)).is_err() {
            panic!(
                "task '{}' is already registered with a service thread",
                task.name()
            );
        }
        debug!(
            thread = %self.shared.name,
            task = task.name(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "task registered"
        );
        self.shared.schedule_task(task, delay);
    }

    /// Request orderly shutdown and block until the worker has joined.
    ///
    /// Interrupts any in-progress wait promptly (bounded by the notify
    /// latency, not the remaining sleep interval). A task whose `execute`
    /// has already started finishes first; no further task runs afterwards.
    pub fn stop(mut self) -> Result<(), ServiceThreadError> {
        self.stop_inner()
    }

    fn stop_inner(&mut self) -> Result<(), ServiceThreadError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        {
            let mut state = self.shared.lock();
            state.stop_requested = true;
            if matches!(state.state, RunState::Created | RunState::Running) {
                state.state = RunState::StopRequested;
            }
        }
        self.shared.wakeup.notify_all();
        info!(thread = %self.shared.name, "stop requested");

        match worker.join() {
            Ok(()) => Ok(()),
            Err(_) => Err(ServiceThreadError::WorkerPanicked {
                name: self.shared.name.clone(),
            }),
        }
    }

    /// Accumulated execution time across all task runs. Diagnostics only.
    #[must_use]
    pub fn virtual_time(&self) -> Duration {
        Duration::from_nanos(self.shared.vtime_ns.load(Ordering::SeqCst))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.shared.lock().state
    }

    /// Diagnostic snapshot.
    #[must_use]
    pub fn stats(&self) -> ServiceThreadStats {
        let state = self.shared.lock();
        ServiceThreadStats {
            name: self.shared.name.clone(),
            state: state.state,
            queued_tasks: state.queue.len(),
            tasks_executed: self.shared.tasks_executed.load(Ordering::SeqCst),
            virtual_time_ms: self.shared.vtime_ns.load(Ordering::SeqCst) / 1_000_000,
        }
    }
}

impl Drop for ServiceThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop_inner() {
            warn!(error = %e, "service thread shut down uncleanly");
        }
    }
}

// ── Worker loop ──────────────────────────────────────────────────────────────

/// Main loop: drain every due task, execute each with the monitor released,
/// then sleep until the next deadline or an early wakeup (registration or
/// stop request).
fn run_service(shared: &Arc<Shared>, max_wait: Duration) {
    let mut state = shared.lock();
    if !state.stop_requested {
        state.state = RunState::Running;
    }
    debug!(thread = %shared.name, "service loop running");

    loop {
        if state.stop_requested {
            break;
        }
        if let Some(task) = pop_due_task(&mut state, shared.clock.as_ref()) {
            // Execute with the monitor released so other threads (and the
            // task itself) can register and reschedule concurrently.
            drop(state);
            run_task(shared, &task);
            state = shared.lock();
            continue;
        }
        let wait = time_to_next_task(&state, shared.clock.as_ref()).min(max_wait);
        let (guard, _timed_out) = shared
            .wakeup
            .wait_timeout(state, wait)
            .unwrap_or_else(|e| e.into_inner());
        state = guard;
    }

    state.state = RunState::Stopped;
    drop(state);
    debug!(thread = %shared.name, "service loop stopped");
}

/// Pop the head task if it is due. `None` when nothing is due — including
/// when only the sentinel remains, whose maximal due time never passes.
fn pop_due_task(state: &mut QueueState, clock: &dyn Clock) -> Option<Arc<ServiceTask>> {
    if state.queue.is_empty() || state.queue.peek().due_ms() > clock.now_ms() {
        return None;
    }
    Some(state.queue.pop())
}

/// Time until the head task is due, clamped to zero. With only the sentinel
/// queued this is effectively "forever" (callers cap it).
fn time_to_next_task(state: &QueueState, clock: &dyn Clock) -> Duration {
    let due = state.queue.peek().due_ms();
    Duration::from_millis(due.saturating_sub(clock.now_ms()))
}

/// Execute one task and account its runtime into the virtual-time counter.
fn run_task(shared: &Arc<Shared>, task: &Arc<ServiceTask>) {
    let started = Instant::now();
    {
        let mut job = task.lock_job();
        let mut ctx = TaskContext::new(shared, task);
        job.execute(&mut ctx);
    }
    let elapsed = started.elapsed();
    shared.vtime_ns.fetch_add(
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
        Ordering::SeqCst,
    );
    shared.tasks_executed.fetch_add(1, Ordering::SeqCst);
    trace!(
        thread = %shared.name,
        task = task.name(),
        elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
        "task executed"
    );
}
