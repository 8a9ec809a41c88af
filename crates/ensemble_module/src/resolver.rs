//! Lazy handles for modules that are still being composed.
//!
//! Two modules that need each other cannot both finish composing first. A
//! [`LazyHandle`] breaks the knot: it is a typed index into the runtime's
//! module arena, and every read through it is resolved against the module's
//! registry *at read time*.
//!
//! ```
//! use ensemble_module::prelude::*;
//! use serde_json::{json, Value};
//!
//! let runtime = Runtime::new();
//! let ping = runtime.create("ping").unwrap();
//! let pong = runtime.create("pong").unwrap();
//!
//! // Wire both directions before either has any methods.
//! let ping = ping.use_module(pong.lazy());
//! let pong = pong.use_module(ping.lazy());
//!
//! let ping = ping
//!     .pipe("ping", |ctx| {
//!         let pong = ctx.deferred("pong");
//!         Method::new(move |arg| pong.call(arg))
//!     })
//!     .unwrap();
//! let _pong = pong.decorate("pong", Method::new(|_| Ok(json!("pong"))));
//!
//! assert_eq!(ping.call("ping", Value::Null).unwrap(), json!("pong"));
//! ```
//!
//! # Memoization
//!
//! The runtime keeps one handle per module, so wrapping the same module twice
//! yields handles for which [`LazyHandle::ptr_eq`] holds. The cache is owned
//! by the runtime, entries are evicted when a module stops, and clearing it is
//! always safe: a fresh handle resolves exactly like the old one.
//!
//! # Hazard
//!
//! Reads are resolved on demand and nothing detects cycles between
//! *invocations*. A method that unconditionally calls back into a cycle with no
//! base case recurses until the stack is exhausted.

use core::fmt;
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::entry::{Entry, Method, Outcome};
use crate::error::MethodError;
use crate::runtime::{ModuleCell, ModuleId, RuntimeInner};

// ─────────────────────────────────────────────────────────────────────────────
// LazyHandle
// ─────────────────────────────────────────────────────────────────────────────

struct HandleInner {
    id: ModuleId,
    name: Arc<str>,
    runtime: Weak<RuntimeInner>,
}

/// A memoized forward reference to a module.
///
/// Handles hold the runtime weakly; once the runtime is dropped every read
/// through a handle yields `None` or [`MethodError::Unresolved`].
#[derive(Clone)]
pub struct LazyHandle {
    inner: Arc<HandleInner>,
}

impl LazyHandle {
    pub(crate) fn new(id: ModuleId, name: Arc<str>, runtime: Weak<RuntimeInner>) -> Self {
        Self {
            inner: Arc::new(HandleInner { id, name, runtime }),
        }
    }

    /// Returns the id of the module this handle points to.
    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.inner.id
    }

    /// Returns the name of the module this handle points to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns true if both handles are the same memoized handle.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Returns true while the owning runtime is alive.
    #[must_use]
    pub fn is_resolvable(&self) -> bool {
        self.resolve().is_some()
    }

    pub(crate) fn resolve(&self) -> Option<Arc<ModuleCell>> {
        self.inner.runtime.upgrade()?.cell(self.inner.id)
    }

    /// Reads `name` from the module's current surface.
    ///
    /// Returns `None` if the module has no such entry *yet*.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Entry> {
        let cell = self.resolve()?;
        lookup(&cell, name, &mut Vec::new())
    }

    /// Invokes `name` on the module's current surface.
    ///
    /// # Errors
    ///
    /// - [`MethodError::Unresolved`] if the runtime is gone
    /// - [`MethodError::NotFound`] if the entry does not exist yet
    /// - any error from [`Entry::invoke`]
    pub fn call(&self, name: &str, arg: Value) -> Result<Value, MethodError> {
        self.entry(name)?.invoke(self.name(), name, arg)
    }

    /// Runs `name` as a chain step on the module's current surface.
    ///
    /// # Errors
    ///
    /// Same as [`call()`](Self::call), plus [`MethodError::NotChainable`] if
    /// the entry is not a step.
    pub fn call_chain(&self, name: &str, arg: Value) -> Result<Outcome, MethodError> {
        self.entry(name)?.invoke_chain(self.name(), name, arg)
    }

    /// Returns a method that looks `name` up each time it is called.
    ///
    /// This is how a composition step refers to an entry that does not exist
    /// yet but will by the time the method runs.
    #[must_use]
    pub fn method(&self, name: impl Into<String>) -> Method {
        let handle = self.clone();
        let name = name.into();
        Method::new(move |arg| handle.call(&name, arg))
    }

    fn entry(&self, name: &str) -> Result<Entry, MethodError> {
        let cell = self.resolve().ok_or_else(|| MethodError::Unresolved {
            module: self.name().to_string(),
        })?;
        lookup(&cell, name, &mut Vec::new()).ok_or_else(|| MethodError::NotFound {
            module: self.name().to_string(),
            name: name.to_string(),
        })
    }
}

impl PartialEq for LazyHandle {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl Eq for LazyHandle {}

impl fmt::Debug for LazyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Looks `name` up on `cell`, then through its forwarding sources.
///
/// Local entries win; forwarding sources are searched most recent first.
/// `visited` keeps a lookup from walking around a cycle of `use`d handles.
pub(crate) fn lookup(cell: &ModuleCell, name: &str, visited: &mut Vec<ModuleId>) -> Option<Entry> {
    if visited.contains(&cell.id) {
        return None;
    }
    visited.push(cell.id);

    if let Some(entry) = cell.registry.get(name) {
        return Some(entry);
    }
    lookup_forwards(&cell.registry.forwards(), name, visited)
}

/// Looks `name` up through a list of forwarding sources.
pub(crate) fn lookup_forwards(
    forwards: &[LazyHandle],
    name: &str,
    visited: &mut Vec<ModuleId>,
) -> Option<Entry> {
    forwards.iter().find_map(|handle| {
        let target = handle.resolve()?;
        lookup(&target, name, visited)
    })
}

/// Collects every entry visible on `cell`, local and forwarded.
///
/// Each name resolves exactly as [`lookup`] would resolve it right now.
pub(crate) fn visible_entries(cell: &ModuleCell) -> HashMap<String, Entry> {
    let mut names = Vec::new();
    collect_names(cell, &mut names, &mut Vec::new());

    names
        .into_iter()
        .filter_map(|name| {
            let entry = lookup(cell, &name, &mut Vec::new())?;
            Some((name, entry))
        })
        .collect()
}

fn collect_names(cell: &ModuleCell, names: &mut Vec<String>, visited: &mut Vec<ModuleId>) {
    if visited.contains(&cell.id) {
        return;
    }
    visited.push(cell.id);

    for name in cell.registry.names() {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    for handle in cell.registry.forwards() {
        if let Some(target) = handle.resolve() {
            collect_names(&target, names, visited);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HandleCache
// ─────────────────────────────────────────────────────────────────────────────

/// One handle per module identity, owned by the runtime.
#[derive(Default)]
pub(crate) struct HandleCache {
    handles: Mutex<HashMap<ModuleId, LazyHandle>>,
}

impl HandleCache {
    pub(crate) fn get_or_insert_with(
        &self,
        id: ModuleId,
        create: impl FnOnce() -> LazyHandle,
    ) -> LazyHandle {
        self.handles.lock().entry(id).or_insert_with(create).clone()
    }

    pub(crate) fn evict(&self, id: ModuleId) -> bool {
        self.handles.lock().remove(&id).is_some()
    }

    pub(crate) fn clear(&self) {
        self.handles.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.lock().len()
    }
}
