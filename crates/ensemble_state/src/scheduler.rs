//! Cooperative deferred-task queue.
//!
//! The [`Scheduler`] is the only suspension point in Ensemble. Work handed to
//! [`defer()`](Scheduler::defer) never runs on the caller's stack; it runs when
//! the host drives a turn with [`tick()`](Scheduler::tick).
//!
//! # Turns
//!
//! A turn runs exactly the tasks that were queued when the turn began. Tasks
//! deferred while a turn is running land in the next turn, which bounds
//! re-entrancy: a state watcher that writes state again cannot extend the flush
//! it is being notified from.
//!
//! ```
//! use ensemble_state::scheduler::Scheduler;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let scheduler = Scheduler::new();
//! let runs = Arc::new(AtomicUsize::new(0));
//!
//! let inner = scheduler.clone();
//! let counter = Arc::clone(&runs);
//! scheduler.defer(move || {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     let counter = Arc::clone(&counter);
//!     inner.defer(move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     });
//! });
//!
//! assert_eq!(scheduler.tick(), 1);
//! assert_eq!(runs.load(Ordering::SeqCst), 1);
//! assert_eq!(scheduler.run_until_idle(), 1);
//! assert_eq!(runs.load(Ordering::SeqCst), 2);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// A unit of deferred work.
type Task = Box<dyn FnOnce() + Send>;

/// Single-shot deferred task queue shared by every store of a runtime.
///
/// Cloning a `Scheduler` yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct Scheduler {
    queue: Arc<Mutex<VecDeque<Task>>>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queues `task` to run once, on the next turn.
    ///
    /// Enqueued tasks cannot be cancelled.
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        self.queue.lock().push_back(Box::new(task));
    }

    /// Returns the number of tasks waiting for a turn.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if no task is waiting.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Runs one turn and returns how many tasks ran.
    ///
    /// The queue lock is released before any task runs, so tasks may defer
    /// more work; that work waits for the following turn.
    pub fn tick(&self) -> usize {
        let batch = core::mem::take(&mut *self.queue.lock());
        let count = batch.len();
        if count > 0 {
            tracing::trace!(tasks = count, "scheduler turn");
        }
        for task in batch {
            task();
        }
        count
    }

    /// Runs turns until the queue is empty and returns the total task count.
    ///
    /// Tasks that keep deferring new work forever keep this loop alive.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.tick();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn new_scheduler_is_idle() {
        let scheduler = Scheduler::new();
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.tick(), 0);
    }

    #[test]
    fn defer_does_not_run_synchronously() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        scheduler.defer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 1);

        scheduler.tick();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn tasks_run_in_enqueue_order() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let log = Arc::clone(&log);
            scheduler.defer(move || log.lock().push(i));
        }

        scheduler.tick();
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn nested_defer_waits_for_next_turn() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner = scheduler.clone();
        let outer_log = Arc::clone(&log);
        scheduler.defer(move || {
            outer_log.lock().push("outer");
            let nested_log = Arc::clone(&outer_log);
            inner.defer(move || nested_log.lock().push("nested"));
        });

        assert_eq!(scheduler.tick(), 1);
        assert_eq!(*log.lock(), vec!["outer"]);
        assert_eq!(scheduler.pending(), 1);

        assert_eq!(scheduler.tick(), 1);
        assert_eq!(*log.lock(), vec!["outer", "nested"]);
    }

    #[test]
    fn run_until_idle_drains_chained_work() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        fn chain(scheduler: Scheduler, runs: Arc<AtomicUsize>, remaining: usize) {
            if remaining == 0 {
                return;
            }
            let next = scheduler.clone();
            scheduler.defer(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                chain(next, runs, remaining - 1);
            });
        }

        chain(scheduler.clone(), Arc::clone(&runs), 5);

        assert_eq!(scheduler.run_until_idle(), 5);
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        assert!(scheduler.is_idle());
    }
}
