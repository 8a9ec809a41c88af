//! Start/stop lifecycle hooks.
//!
//! A module progresses through these states linearly:
//! `NotStarted` → `Started` → `Stopped`
//!
//! # Eager activation
//!
//! There is no explicit `start()` call. Registering the first start hook on a
//! module that has not started moves it to `Started` on the spot and runs every
//! start hook queued so far, in registration order. Start hooks registered
//! afterwards run immediately, alone. Code that expects start hooks to wait for
//! the rest of the module to be composed must register them last.
//!
//! # Stop
//!
//! Stop hooks only accumulate. The first [`stop()`](HookManager::stop) runs
//! each of them once, in registration order; later calls do nothing.

use parking_lot::Mutex;

/// A hook invoked with the module context.
pub type Hook<C> = Box<dyn FnOnce(&C) + Send>;

/// The lifecycle state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// No start hook has been registered yet (initial state).
    #[default]
    NotStarted,
    /// A start hook has been registered and run.
    Started,
    /// `stop()` has been called. Terminal.
    Stopped,
}

struct HookState<C> {
    state: LifecycleState,
    queued_start: Vec<Hook<C>>,
    stop_hooks: Vec<Hook<C>>,
}

/// Ordered start/stop registries for one module.
///
/// Hooks run after the internal lock is released, so a hook may register
/// further hooks or stop the module it belongs to.
pub struct HookManager<C> {
    inner: Mutex<HookState<C>>,
}

impl<C> Default for HookManager<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> HookManager<C> {
    /// Creates a manager in the `NotStarted` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HookState {
                state: LifecycleState::NotStarted,
                queued_start: Vec::new(),
                stop_hooks: Vec::new(),
            }),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    /// Registers a start hook, running it (and any queued ones) right away.
    ///
    /// `context` is only built when a hook actually runs. Returns the number
    /// of hooks that ran; registering on a stopped module runs nothing.
    pub fn add_start_hook(&self, hook: Hook<C>, context: impl FnOnce() -> C) -> usize {
        let to_run = {
            let mut inner = self.inner.lock();
            match inner.state {
                LifecycleState::Stopped => {
                    tracing::warn!("start hook registered after stop; ignoring");
                    return 0;
                }
                LifecycleState::Started => vec![hook],
                LifecycleState::NotStarted => {
                    inner.queued_start.push(hook);
                    inner.state = LifecycleState::Started;
                    core::mem::take(&mut inner.queued_start)
                }
            }
        };

        let context = context();
        let count = to_run.len();
        for hook in to_run {
            hook(&context);
        }
        count
    }

    /// Registers a stop hook.
    pub fn add_stop_hook(&self, hook: Hook<C>) {
        let mut inner = self.inner.lock();
        if inner.state == LifecycleState::Stopped {
            tracing::warn!("stop hook registered after stop; it will never run");
        }
        inner.stop_hooks.push(hook);
    }

    /// Stops the module, running every stop hook once.
    ///
    /// Returns true on the first call and false on every later call.
    pub fn stop(&self, context: impl FnOnce() -> C) -> bool {
        let to_run = {
            let mut inner = self.inner.lock();
            if inner.state == LifecycleState::Stopped {
                return false;
            }
            inner.state = LifecycleState::Stopped;
            inner.queued_start.clear();
            core::mem::take(&mut inner.stop_hooks)
        };

        let context = context();
        for hook in to_run {
            hook(&context);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn logging(log: &Log, tag: &'static str) -> Hook<()> {
        let log = Arc::clone(log);
        Box::new(move |_: &()| log.lock().push(tag))
    }

    #[test]
    fn starts_not_started() {
        let hooks = HookManager::<()>::new();
        assert_eq!(hooks.state(), LifecycleState::NotStarted);
    }

    #[test]
    fn first_start_hook_runs_immediately() {
        let hooks = HookManager::new();
        let log = Log::default();

        assert_eq!(hooks.add_start_hook(logging(&log, "first"), || ()), 1);

        assert_eq!(*log.lock(), vec!["first"]);
        assert_eq!(hooks.state(), LifecycleState::Started);
    }

    #[test]
    fn later_start_hook_runs_alone() {
        let hooks = HookManager::new();
        let log = Log::default();

        hooks.add_start_hook(logging(&log, "first"), || ());
        hooks.add_start_hook(logging(&log, "second"), || ());

        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn context_is_built_lazily() {
        let hooks = HookManager::<u32>::new();
        hooks.stop(|| 0);

        let built = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&built);
        let ran = hooks.add_start_hook(Box::new(|_: &u32| {}), move || {
            *flag.lock() = true;
            1
        });

        assert_eq!(ran, 0);
        assert!(!*built.lock());
    }

    #[test]
    fn stop_runs_hooks_in_order_once() {
        let hooks = HookManager::new();
        let log = Log::default();

        hooks.add_stop_hook(logging(&log, "a"));
        hooks.add_stop_hook(logging(&log, "b"));

        assert!(hooks.stop(|| ()));
        assert!(!hooks.stop(|| ()));

        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert_eq!(hooks.state(), LifecycleState::Stopped);
    }

    #[test]
    fn stop_without_start_is_terminal() {
        let hooks = HookManager::new();
        let log = Log::default();

        hooks.stop(|| ());
        hooks.add_start_hook(logging(&log, "late"), || ());

        assert!(log.lock().is_empty());
        assert_eq!(hooks.state(), LifecycleState::Stopped);
    }

    #[test]
    fn hook_may_register_from_inside_a_hook() {
        let hooks = Arc::new(HookManager::<()>::new());
        let log = Log::default();

        let inner_hooks = Arc::clone(&hooks);
        let inner_log = Arc::clone(&log);
        hooks.add_start_hook(
            Box::new(move |_: &()| {
                inner_log.lock().push("outer");
                inner_hooks.add_stop_hook(logging(&inner_log, "registered-in-start"));
            }),
            || (),
        );
        hooks.stop(|| ());

        assert_eq!(*log.lock(), vec!["outer", "registered-in-start"]);
    }
}
