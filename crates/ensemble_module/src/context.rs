//! The composition context handed to derive functions and hooks.

use std::sync::Arc;

use ensemble_state::store::StateStore;
use hashbrown::HashMap;
use serde_json::Value;

use crate::config::Config;
use crate::entry::{Entry, Method, Step};
use crate::error::MethodError;
use crate::resolver::{LazyHandle, lookup_forwards};
use crate::runtime::{ModuleCell, ModuleId};

/// Everything a composition step may depend on.
///
/// A context is captured when `derive`, `pipe`, `chain` or a hook runs:
///
/// - the module's [`StateStore`] (live)
/// - the module's [`Config`]
/// - a copy of every entry registered *so far*
/// - the forwarding sources installed by `use` of lazy handles (resolved live)
///
/// Entries registered after the context was captured are only reachable
/// through [`deferred()`](Self::deferred).
///
/// # Example
///
/// ```
/// use ensemble_module::prelude::*;
/// use serde_json::json;
///
/// let runtime = Runtime::new();
/// let math = runtime
///     .create("math")
///     .unwrap()
///     .derive(|_| Record::new().method("double", |x| Ok(json!(x.as_i64().unwrap_or(0) * 2))))
///     .derive(|ctx| {
///         let double = ctx.method("double").unwrap();
///         Record::new().method("quad", move |x| double.call(double.call(x)?))
///     });
///
/// assert_eq!(math.call("quad", json!(3)).unwrap(), json!(12));
/// ```
pub struct Context {
    id: ModuleId,
    name: Arc<str>,
    state: StateStore,
    config: Config,
    entries: HashMap<String, Entry>,
    forwards: Vec<LazyHandle>,
    this: LazyHandle,
}

impl Context {
    pub(crate) fn capture(cell: &ModuleCell, this: LazyHandle) -> Self {
        Self {
            id: cell.id,
            name: Arc::clone(&cell.name),
            state: cell.state.clone(),
            config: cell.config.clone(),
            entries: cell.registry.snapshot(),
            forwards: cell.registry.forwards(),
            this,
        }
    }

    /// Returns the module id.
    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Returns the module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the module's state store.
    #[must_use]
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Returns the module's config.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a lazy handle to the module itself.
    #[must_use]
    pub fn handle(&self) -> &LazyHandle {
        &self.this
    }

    /// Returns the entry visible under `name`.
    ///
    /// Entries captured with the context come first; forwarding sources are
    /// then read at call time.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Entry> {
        if let Some(entry) = self.entries.get(name) {
            return Some(entry.clone());
        }
        let mut visited = vec![self.id];
        lookup_forwards(&self.forwards, name, &mut visited)
    }

    /// Returns true if an entry is visible under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns the plain value visible under `name`.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<Value> {
        match self.get(name)? {
            Entry::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the callable visible under `name` as a [`Method`].
    ///
    /// # Errors
    ///
    /// - [`MethodError::NotFound`] if nothing is visible under `name`
    /// - [`MethodError::NotCallable`] if the entry is a plain value
    pub fn method(&self, name: &str) -> Result<Method, MethodError> {
        self.require(name)?
            .into_method()
            .ok_or_else(|| MethodError::NotCallable {
                module: self.name.to_string(),
                name: name.to_string(),
            })
    }

    /// Returns the chain step visible under `name`.
    ///
    /// # Errors
    ///
    /// - [`MethodError::NotFound`] if nothing is visible under `name`
    /// - [`MethodError::NotChainable`] if the entry is not a step
    pub fn step(&self, name: &str) -> Result<Step, MethodError> {
        match self.require(name)? {
            Entry::Step(step) => Ok(step),
            _ => Err(MethodError::NotChainable {
                module: self.name.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Invokes the entry visible under `name`.
    ///
    /// # Errors
    ///
    /// Same as [`Entry::invoke`], plus [`MethodError::NotFound`].
    pub fn call(&self, name: &str, arg: Value) -> Result<Value, MethodError> {
        self.require(name)?.invoke(&self.name, name, arg)
    }

    /// Returns a method that resolves `name` on the module each time it runs.
    ///
    /// Use this to refer to entries that are not registered yet, including
    /// ones a lazily `use`d module will only register later.
    #[must_use]
    pub fn deferred(&self, name: impl Into<String>) -> Method {
        self.this.method(name)
    }

    /// Iterates over the names captured with the context.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn require(&self, name: &str) -> Result<Entry, MethodError> {
        self.get(name).ok_or_else(|| MethodError::NotFound {
            module: self.name.to_string(),
            name: name.to_string(),
        })
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("forwards", &self.forwards.len())
            .finish()
    }
}
