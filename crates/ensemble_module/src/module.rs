//! The module builder.
//!
//! A [`Module`] is composed by chaining builder calls. Each call consumes the
//! module and hands it back, extended:
//!
//! ```
//! use ensemble_module::prelude::*;
//! use serde_json::json;
//!
//! let runtime = Runtime::new();
//! let greeter = runtime
//!     .module("greeter")
//!     .with_config(json!({ "greeting": "hello" }))
//!     .build()
//!     .unwrap()
//!     .derive(|ctx| {
//!         let greeting = ctx.config().get_as::<String>("greeting").unwrap_or_default();
//!         Record::new().method("greet", move |who| {
//!             Ok(json!(format!("{greeting}, {}", who.as_str().unwrap_or("stranger"))))
//!         })
//!     });
//!
//! assert_eq!(greeter.call("greet", json!("ada")).unwrap(), json!("hello, ada"));
//! ```
//!
//! # Name resolution
//!
//! A name is looked up in the module's own registry first, then through the
//! modules installed by [`use_module`](Module::use_module) with a
//! [`LazyHandle`], most recent first.

use core::fmt;
use std::sync::Arc;

use ensemble_state::store::StateStore;
use serde_json::Value;

use crate::config::Config;
use crate::context::Context;
use crate::entry::{Entry, Outcome, Record};
use crate::error::{CompositionError, MethodError};
use crate::hooks::LifecycleState;
use crate::resolver::{LazyHandle, lookup, visible_entries};
use crate::runtime::{ModuleCell, ModuleId, Runtime};

// ─────────────────────────────────────────────────────────────────────────────
// Dependency
// ─────────────────────────────────────────────────────────────────────────────

enum DependencyKind {
    Direct(Arc<ModuleCell>),
    Lazy(LazyHandle),
}

/// Something a module can [`use`](Module::use_module).
///
/// - `&Module` copies every entry visible on the module right now
/// - [`LazyHandle`] forwards missing names to the module at lookup time
pub struct Dependency(DependencyKind);

impl From<&Module> for Dependency {
    fn from(module: &Module) -> Self {
        Self(DependencyKind::Direct(Arc::clone(module.cell())))
    }
}

impl From<LazyHandle> for Dependency {
    fn from(handle: LazyHandle) -> Self {
        Self(DependencyKind::Lazy(handle))
    }
}

impl From<&LazyHandle> for Dependency {
    fn from(handle: &LazyHandle) -> Self {
        Self(DependencyKind::Lazy(handle.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module
// ─────────────────────────────────────────────────────────────────────────────

/// A composable unit: state, config, named entries and lifecycle hooks.
///
/// Builder calls consume the module and hand it back, but the registry they
/// extend is shared. Cloning yields another handle to the *same* module, so
/// composing through a clone also changes what the original sees:
///
/// ```
/// use ensemble_module::prelude::*;
/// use serde_json::json;
///
/// let runtime = Runtime::new();
/// let original = runtime.create("m").unwrap();
/// let _extended = original.clone().decorate("added", json!(1));
///
/// assert!(original.contains("added"));
/// ```
#[derive(Clone)]
#[must_use = "builder calls return the extended module"]
pub struct Module {
    cell: Arc<ModuleCell>,
    runtime: Runtime,
}

impl Module {
    pub(crate) fn new(cell: Arc<ModuleCell>, runtime: Runtime) -> Self {
        Self { cell, runtime }
    }

    pub(crate) fn cell(&self) -> &Arc<ModuleCell> {
        &self.cell
    }

    /// Returns the module id.
    pub fn id(&self) -> ModuleId {
        self.cell.id
    }

    /// Returns the module name.
    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Returns the module's state store.
    pub fn state(&self) -> &StateStore {
        &self.cell.state
    }

    /// Returns the module's config.
    pub fn config(&self) -> &Config {
        &self.cell.config
    }

    /// Returns the lifecycle state.
    pub fn lifecycle(&self) -> LifecycleState {
        self.cell.hooks.state()
    }

    /// Returns the runtime that owns this module.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Returns the memoized lazy handle for this module.
    pub fn lazy(&self) -> LazyHandle {
        self.runtime.handle_for(&self.cell)
    }

    /// Captures a composition context for this module as it is now.
    pub fn context(&self) -> Context {
        self.runtime.context_for(&self.cell)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Composition
    // ─────────────────────────────────────────────────────────────────────

    /// Brings another module's entries into scope.
    ///
    /// A module reference copies every entry visible on it now, including
    /// the ones it forwards to other modules, overwriting entries of the same
    /// name. A lazy handle installs a forwarding source instead; using the
    /// same handle twice has no further effect.
    pub fn use_module(self, dependency: impl Into<Dependency>) -> Self {
        match dependency.into().0 {
            DependencyKind::Direct(source) => {
                let entries = visible_entries(&source);
                let copied = entries.len();
                for (name, entry) in entries {
                    self.cell.registry.insert(name, entry);
                }
                tracing::trace!(
                    module = %self.cell.name,
                    source = %source.name,
                    copied,
                    "entries copied"
                );
            }
            DependencyKind::Lazy(handle) => {
                let name = handle.name().to_string();
                if !self.cell.registry.forward(handle) {
                    tracing::debug!(
                        module = %self.cell.name,
                        source = %name,
                        "forwarding source already installed"
                    );
                }
            }
        }
        self
    }

    /// Computes new entries from the current context and merges them.
    ///
    /// `f` runs exactly once. The record is merged in insertion order.
    pub fn derive(self, f: impl FnOnce(&Context) -> Record) -> Self {
        let record = f(&self.context());
        let merged = self.cell.registry.merge(record);
        tracing::trace!(module = %self.cell.name, merged, "record merged");
        self
    }

    /// Registers a single entry, replacing any entry with the same name.
    pub fn decorate(self, name: impl Into<String>, entry: impl Into<Entry>) -> Self {
        self.cell.registry.insert(name.into(), entry.into());
        self
    }

    /// Registers the callable produced by `f` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::NotCallable`] if `f` produced a plain value.
    /// Nothing is registered in that case.
    pub fn pipe<E: Into<Entry>>(
        self,
        name: impl Into<String>,
        f: impl FnOnce(&Context) -> E,
    ) -> Result<Self, CompositionError> {
        let name = name.into();
        let entry = f(&self.context()).into();
        if !entry.is_callable() {
            return Err(CompositionError::NotCallable {
                module: self.cell.name.to_string(),
                name,
                kind: entry.kind(),
            });
        }
        self.cell.registry.insert(name, entry);
        Ok(self)
    }

    /// Registers the step produced by `f` under `name`.
    ///
    /// If `name` already holds a step, the new step is bound after it: it
    /// only runs on the earlier step's success value, and an earlier failure
    /// is returned untouched.
    ///
    /// # Errors
    ///
    /// - [`CompositionError::NotChainable`] if `f` produced a method
    /// - [`CompositionError::NotCallable`] if `f` produced a plain value
    pub fn chain<E: Into<Entry>>(
        self,
        name: impl Into<String>,
        f: impl FnOnce(&Context) -> E,
    ) -> Result<Self, CompositionError> {
        let name = name.into();
        let step = match f(&self.context()).into() {
            Entry::Step(step) => step,
            other => {
                let module = self.cell.name.to_string();
                let kind = other.kind();
                return Err(if other.is_callable() {
                    CompositionError::NotChainable { module, name, kind }
                } else {
                    CompositionError::NotCallable { module, name, kind }
                });
            }
        };

        let bound = match self.cell.registry.get(&name) {
            Some(Entry::Step(previous)) => previous.then(step),
            _ => step,
        };
        self.cell.registry.insert(name, bound.into());
        Ok(self)
    }

    /// Calls `handler(new, old)` whenever a flush changes `key`.
    pub fn watch(
        self,
        key: impl Into<String>,
        handler: impl Fn(&Value, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.cell.state.watch(key, handler);
        self
    }

    /// Registers a start hook.
    ///
    /// The first start hook starts the module on the spot: it and every hook
    /// queued before it run now, in registration order. Later hooks run
    /// immediately. Register start hooks last if they rely on the rest of the
    /// module being composed.
    pub fn on_start(self, hook: impl FnOnce(&Context) + Send + 'static) -> Self {
        let ran = self
            .cell
            .hooks
            .add_start_hook(Box::new(hook), || self.context());
        if ran > 0 {
            tracing::debug!(module = %self.cell.name, hooks = ran, "start hooks ran");
        }
        self
    }

    /// Registers a stop hook, run once by the first [`stop()`](Self::stop).
    pub fn on_stop(self, hook: impl FnOnce(&Context) + Send + 'static) -> Self {
        self.cell.hooks.add_stop_hook(Box::new(hook));
        self
    }

    /// Stops the module and evicts its lazy handle from the runtime cache.
    ///
    /// Returns true on the first call; later calls do nothing.
    pub fn stop(&self) -> bool {
        self.runtime.stop_cell(&self.cell)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lookup and invocation
    // ─────────────────────────────────────────────────────────────────────

    /// Returns the entry visible under `name`.
    pub fn get(&self, name: &str) -> Option<Entry> {
        lookup(&self.cell, name, &mut Vec::new())
    }

    /// Returns true if an entry is visible under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Invokes the entry visible under `name`.
    ///
    /// # Errors
    ///
    /// - [`MethodError::NotFound`] if no entry is visible
    /// - [`MethodError::NotCallable`] if the entry is a plain value
    /// - any error the method body returns, unmodified
    pub fn call(&self, name: &str, arg: Value) -> Result<Value, MethodError> {
        self.require(name)?.invoke(&self.cell.name, name, arg)
    }

    /// Runs the step visible under `name`.
    ///
    /// A failing step is an `Ok(Err(..))`, not a [`MethodError`].
    ///
    /// # Errors
    ///
    /// - [`MethodError::NotFound`] if no entry is visible
    /// - [`MethodError::NotChainable`] if the entry is not a step
    pub fn call_chain(&self, name: &str, arg: Value) -> Result<Outcome, MethodError> {
        self.require(name)?.invoke_chain(&self.cell.name, name, arg)
    }

    /// Returns the names registered locally on this module, sorted.
    pub fn names(&self) -> Vec<String> {
        self.cell.registry.names()
    }

    fn require(&self, name: &str) -> Result<Entry, MethodError> {
        self.get(name).ok_or_else(|| MethodError::NotFound {
            module: self.cell.name.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .field("lifecycle", &self.lifecycle())
            .field("entries", &self.names())
            .finish()
    }
}
