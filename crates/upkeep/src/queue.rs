//! Time-ordered task queue with a permanent sentinel tail.
//!
//! The queue is a chain of tasks ordered by non-decreasing due time,
//! terminated by a sentinel whose due time is the maximum representable
//! value. The sentinel removes all empty-queue special cases: an insertion
//! scan is guaranteed to find a strictly-later entry, and "empty" simply
//! means "only the sentinel remains".
//!
//! Insertion is stable: among tasks with equal due times, arrival order is
//! preserved (FIFO), because `add_ordered` splices in front of the first
//! entry with a *strictly greater* due time.
//!
//! All access happens under the owning service thread's monitor; the queue
//! itself does no locking.

use std::sync::Arc;

use crate::task::ServiceTask;

/// Ordered queue of [`ServiceTask`]s, head at index 0, sentinel last.
pub struct TaskQueue {
    entries: Vec<Arc<ServiceTask>>,
}

impl TaskQueue {
    /// Create a queue holding only the sentinel.
    #[must_use]
    pub fn new() -> Self {
        let queue = Self {
            entries: vec![ServiceTask::sentinel()],
        };
        queue.verify();
        queue
    }

    /// The head task, without removing it. Returns the sentinel when the
    /// queue holds no real work.
    #[must_use]
    pub fn peek(&self) -> &Arc<ServiceTask> {
        &self.entries[0]
    }

    /// Remove and return the head task.
    ///
    /// # Panics
    ///
    /// Panics if only the sentinel remains — callers must check
    /// [`TaskQueue::is_empty`] (or the head's due time) first. Popping the
    /// sentinel would be a queue-logic bug, surfaced immediately.
    pub fn pop(&mut self) -> Arc<ServiceTask> {
        assert!(
            !self.is_empty(),
            "pop on a task queue holding only the sentinel"
        );
        let task = self.entries.remove(0);
        task.clear_queued();
        self.verify();
        task
    }

    /// Splice `task` in before the first entry with a strictly greater due
    /// time. The sentinel's maximal due time guarantees the scan terminates.
    ///
    /// # Panics
    ///
    /// Panics if `task` is already linked into a queue: a task appears in
    /// its owner's chain at most once.
    pub fn add_ordered(&mut self, task: Arc<ServiceTask>) {
        assert!(
            !task.mark_queued(),
            "task '{}' is already queued",
            task.name()
        );
        let due = task.due_ms();
        let at = self
            .entries
            .iter()
            .position(|entry| entry.due_ms() > due)
            .expect("sentinel must terminate the insertion scan");
        self.entries.insert(at, task);
        self.verify();
    }

    /// True iff the only remaining entry is the sentinel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() == 1
    }

    /// Number of real (non-sentinel) tasks queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    /// Debug-build check: adjacent entries non-decreasing, sentinel terminal.
    fn verify(&self) {
        debug_assert!(
            self.entries
                .windows(2)
                .all(|pair| pair[0].due_ms() <= pair[1].due_ms()),
            "task queue out of order"
        );
        debug_assert!(
            self.entries.last().is_some_and(|tail| tail.is_sentinel()),
            "sentinel missing from queue tail"
        );
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
