//! upkeep: background maintenance scheduler.
//!
//! One dedicated worker thread executes a set of recurring, time-ordered
//! tasks (e.g. "recompute a growth prediction", "check whether periodic
//! cleanup is due") without imposing extra threads per task.
//!
//! # Architecture
//!
//! ```text
//! collaborators ──register_task──► ServiceThread
//!                                    ├── monitor (mutex + condvar)
//!                                    ├── TaskQueue ── [task, task, …, sentinel]
//!                                    └── worker loop: drain due → execute →
//!                                        sleep until next deadline
//! ```
//!
//! Tasks execute strictly serialized, in non-decreasing due-time order
//! (FIFO among equal due times). Registration from any thread — including a
//! task rescheduling itself from inside its own `execute` — wakes the worker
//! so a nearer deadline is never delayed by a stale sleep. Stopping the
//! thread interrupts any in-progress wait promptly and joins cleanly.
//!
//! # Modules
//!
//! - `clock`: monotonic millisecond time sources (trait seam for tests)
//! - `task`: the task abstraction — [`Job`], [`ServiceTask`], [`TaskContext`]
//! - `queue`: time-ordered queue with a permanent sentinel tail
//! - `service`: the worker thread, monitor, and lifecycle
//! - `logging`: `tracing` subscriber setup for embedders and tests
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod clock;
pub mod logging;
pub mod queue;
pub mod service;
pub mod task;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use queue::TaskQueue;
pub use service::{
    RunState, ServiceThread, ServiceThreadConfig, ServiceThreadError, ServiceThreadStats,
};
pub use task::{Job, ServiceTask, TaskContext};

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
