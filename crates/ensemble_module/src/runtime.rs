//! The module set: an arena of modules sharing one scheduler.
//!
//! The [`Runtime`] owns every module created through it, the [`Scheduler`]
//! their state stores flush on, and the lazy-handle cache. It is deliberately
//! small: modules do all the work, the runtime only keeps them addressable.
//!
//! # Lifecycle
//!
//! 1. **Create** - [`Runtime::create`] / [`Runtime::module`] register a module
//! 2. **Compose** - builder calls on [`Module`] add entries, watchers, hooks
//! 3. **Turns** - [`Runtime::tick`] flushes queued state updates
//! 4. **Shutdown** - [`Runtime::shutdown`] stops modules in reverse creation order

use core::fmt;
use std::sync::Arc;

use ensemble_state::scheduler::Scheduler;
use ensemble_state::store::{StateStore, value_kind};
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::context::Context;
use crate::error::ConfigurationError;
use crate::hooks::HookManager;
use crate::module::Module;
use crate::registry::MethodRegistry;
use crate::resolver::{HandleCache, LazyHandle};

// ─────────────────────────────────────────────────────────────────────────────
// ModuleId
// ─────────────────────────────────────────────────────────────────────────────

/// Index of a module in its runtime's arena.
///
/// Ids are assigned in creation order and never reused within one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

impl ModuleId {
    /// Returns the arena index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ModuleCell
// ─────────────────────────────────────────────────────────────────────────────

/// Arena slot holding everything a module owns.
pub(crate) struct ModuleCell {
    pub(crate) id: ModuleId,
    pub(crate) name: Arc<str>,
    pub(crate) state: StateStore,
    pub(crate) config: Config,
    pub(crate) registry: MethodRegistry,
    pub(crate) hooks: HookManager<Context>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct RuntimeInner {
    modules: RwLock<Vec<Arc<ModuleCell>>>,
    names: RwLock<HashMap<Arc<str>, ModuleId>>,
    handles: HandleCache,
    scheduler: Scheduler,
}

impl RuntimeInner {
    pub(crate) fn cell(&self, id: ModuleId) -> Option<Arc<ModuleCell>> {
        self.modules.read().get(id.0).cloned()
    }
}

/// A set of modules sharing one scheduler and one lazy-handle cache.
///
/// Cloning a `Runtime` yields another handle to the same set.
///
/// # Example
///
/// ```
/// use ensemble_module::runtime::Runtime;
/// use serde_json::json;
///
/// let runtime = Runtime::new();
/// let counter = runtime
///     .module("counter")
///     .with_state(json!({ "count": 0 }))
///     .build()
///     .unwrap();
///
/// counter.state().set([("count", 1)]);
/// runtime.tick();
///
/// assert_eq!(counter.state().get().get("count"), Some(&json!(1)));
/// ```
#[derive(Clone, Default)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts describing a module named `name`.
    #[must_use]
    pub fn module(&self, name: impl Into<String>) -> ModuleOptions<'_> {
        ModuleOptions {
            runtime: self,
            name: name.into(),
            state: None,
            config: None,
        }
    }

    /// Creates a module with empty state and config.
    ///
    /// # Errors
    ///
    /// See [`ModuleOptions::build`].
    pub fn create(&self, name: impl Into<String>) -> Result<Module, ConfigurationError> {
        self.module(name).build()
    }

    /// Returns the scheduler shared by every state store in this runtime.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Runs one scheduling turn, flushing every store with queued patches.
    ///
    /// Returns the number of deferred tasks that ran.
    pub fn tick(&self) -> usize {
        self.inner.scheduler.tick()
    }

    /// Runs turns until no deferred work is left.
    pub fn run_until_idle(&self) -> usize {
        self.inner.scheduler.run_until_idle()
    }

    /// Returns the memoized lazy handle for `id`.
    #[must_use]
    pub fn lazy(&self, id: ModuleId) -> Option<LazyHandle> {
        let cell = self.inner.cell(id)?;
        Some(self.handle_for(&cell))
    }

    /// Returns the memoized lazy handle for the module named `name`.
    ///
    /// Names need not be unique. When several modules share a name, the one
    /// created most recently is returned; the others stay reachable through
    /// their own handles and [`lazy()`](Self::lazy).
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<LazyHandle> {
        let id = *self.inner.names.read().get(name)?;
        self.lazy(id)
    }

    /// Returns the module names in creation order.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.inner
            .modules
            .read()
            .iter()
            .map(|cell| cell.name.to_string())
            .collect()
    }

    /// Returns the number of modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.modules.read().len()
    }

    /// Returns true if no module has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.modules.read().is_empty()
    }

    /// Returns the number of memoized lazy handles.
    #[must_use]
    pub fn cached_handles(&self) -> usize {
        self.inner.handles.len()
    }

    /// Drops every memoized lazy handle.
    ///
    /// Handles already handed out keep working.
    pub fn clear_handle_cache(&self) {
        self.inner.handles.clear();
    }

    /// Stops every module in reverse creation order and clears the handle
    /// cache.
    ///
    /// Modules that were already stopped are skipped.
    pub fn shutdown(&self) {
        let cells: Vec<Arc<ModuleCell>> = self.inner.modules.read().clone();
        for cell in cells.iter().rev() {
            self.stop_cell(cell);
        }
        self.inner.handles.clear();
        tracing::debug!(modules = cells.len(), "runtime shut down");
    }

    pub(crate) fn handle_for(&self, cell: &ModuleCell) -> LazyHandle {
        self.inner.handles.get_or_insert_with(cell.id, || {
            LazyHandle::new(cell.id, Arc::clone(&cell.name), Arc::downgrade(&self.inner))
        })
    }

    pub(crate) fn context_for(&self, cell: &Arc<ModuleCell>) -> Context {
        Context::capture(cell, self.handle_for(cell))
    }

    /// Stops one module, returning false if it was already stopped.
    pub(crate) fn stop_cell(&self, cell: &Arc<ModuleCell>) -> bool {
        let stopped = cell.hooks.stop(|| self.context_for(cell));
        if stopped {
            self.inner.handles.evict(cell.id);
            tracing::debug!(module = %cell.name, "module stopped");
        }
        stopped
    }

    fn register(
        &self,
        name: String,
        state: Map<String, Value>,
        config: Map<String, Value>,
    ) -> Arc<ModuleCell> {
        let mut names = self.inner.names.write();
        let mut modules = self.inner.modules.write();
        let id = ModuleId(modules.len());
        let name: Arc<str> = name.into();
        let cell = Arc::new(ModuleCell {
            id,
            name: Arc::clone(&name),
            state: StateStore::new(Arc::clone(&name), state, self.inner.scheduler.clone()),
            config: Config::from_map(config),
            registry: MethodRegistry::new(),
            hooks: HookManager::new(),
        });
        modules.push(Arc::clone(&cell));
        if let Some(shadowed) = names.insert(name, id) {
            tracing::debug!(module = %cell.name, %shadowed, "module name reused");
        }

        tracing::debug!(module = %cell.name, id = %id, "module created");
        cell
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("modules", &self.module_names())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ModuleOptions
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for a new module: name, optional initial state, optional config.
#[must_use = "call `build()` to create the module"]
pub struct ModuleOptions<'a> {
    runtime: &'a Runtime,
    name: String,
    state: Option<Value>,
    config: Option<Value>,
}

impl ModuleOptions<'_> {
    /// Sets the initial state record.
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Sets the config record.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Validates the description and registers the module.
    ///
    /// Nothing is allocated in the runtime unless every check passes.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::MissingName`] if the name is empty or blank
    /// - [`ConfigurationError::InvalidState`] / [`ConfigurationError::InvalidConfig`]
    ///   if a record is not a JSON object
    pub fn build(self) -> Result<Module, ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::MissingName);
        }

        let state = match self.state {
            None => Map::new(),
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                return Err(ConfigurationError::InvalidState {
                    module: self.name,
                    kind: value_kind(&other),
                });
            }
        };
        let config = match self.config {
            None => Map::new(),
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                return Err(ConfigurationError::InvalidConfig {
                    module: self.name,
                    kind: value_kind(&other),
                });
            }
        };

        let cell = self.runtime.register(self.name, state, config);
        Ok(Module::new(cell, self.runtime.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn runtime_new_is_empty() {
        let runtime = Runtime::new();
        assert!(runtime.is_empty());
        assert_eq!(runtime.cached_handles(), 0);
        assert!(runtime.scheduler().is_idle());
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let runtime = Runtime::new();
        let a = runtime.create("a").unwrap();
        let b = runtime.create("b").unwrap();

        assert_eq!(a.id().index(), 0);
        assert_eq!(b.id().index(), 1);
        assert_eq!(runtime.module_names(), vec!["a", "b"]);
    }

    #[test]
    fn empty_name_allocates_nothing() {
        let runtime = Runtime::new();

        assert!(matches!(
            runtime.create(""),
            Err(ConfigurationError::MissingName)
        ));
        assert!(matches!(
            runtime.create("   "),
            Err(ConfigurationError::MissingName)
        ));
        assert!(runtime.is_empty());
    }

    #[test]
    fn same_name_modules_coexist() {
        let runtime = Runtime::new();
        let first = runtime.create("logger").unwrap().decorate("level", json!("info"));
        let second = runtime.create("logger").unwrap().decorate("level", json!("debug"));

        assert_eq!(runtime.len(), 2);
        assert_ne!(first.id(), second.id());
        assert!(!LazyHandle::ptr_eq(&first.lazy(), &second.lazy()));
        assert_eq!(runtime.module_names(), vec!["logger", "logger"]);

        let newest = runtime.lookup("logger").unwrap();
        assert!(LazyHandle::ptr_eq(&newest, &second.lazy()));
        assert_eq!(
            first.lazy().get("level").and_then(|e| e.as_value().cloned()),
            Some(json!("info"))
        );
    }

    #[test]
    fn non_object_records_are_rejected() {
        let runtime = Runtime::new();

        let err = runtime.module("s").with_state(json!(3)).build().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidState { kind: "number", .. }));

        let err = runtime
            .module("c")
            .with_config(json!("text"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidConfig { kind: "string", .. }));

        assert!(runtime.is_empty());
    }

    #[test]
    fn lookup_by_name_returns_memoized_handle() {
        let runtime = Runtime::new();
        let module = runtime.create("named").unwrap();

        let by_name = runtime.lookup("named").unwrap();
        assert!(LazyHandle::ptr_eq(&by_name, &module.lazy()));
        assert!(runtime.lookup("other").is_none());
    }

    #[test]
    fn shutdown_stops_in_reverse_order() {
        let runtime = Runtime::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut modules = Vec::new();
        for name in ["first", "second", "third"] {
            let log = Arc::clone(&order);
            modules.push(
                runtime
                    .create(name)
                    .unwrap()
                    .on_stop(move |ctx| log.lock().push(ctx.name().to_string())),
            );
        }

        runtime.shutdown();
        runtime.shutdown();

        assert_eq!(*order.lock(), vec!["third", "second", "first"]);
        assert_eq!(runtime.cached_handles(), 0);
    }
}
