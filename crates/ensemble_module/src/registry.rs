//! Per-module method registry.
//!
//! The registry maps names to [`Entry`]s and keeps the list of lazy handles
//! whose modules it forwards missing names to. Lookups are by name only; the
//! last registration under a name wins.

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::entry::{Entry, Record};
use crate::resolver::LazyHandle;

/// Name → entry storage for one module.
///
/// Locks are held only while copying entries in or out, never while an entry
/// is invoked, so methods may freely call back into the module that owns them.
#[derive(Default)]
pub(crate) struct MethodRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    /// Forwarding sources installed by `use` of a lazy handle, oldest first.
    forwards: RwLock<Vec<LazyHandle>>,
}

impl MethodRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `entry` under `name`, returning the entry it replaced.
    pub(crate) fn insert(&self, name: String, entry: Entry) -> Option<Entry> {
        self.entries.write().insert(name, entry)
    }

    /// Merges a record in insertion order and returns the number of entries.
    pub(crate) fn merge(&self, record: Record) -> usize {
        let mut entries = self.entries.write();
        let mut count = 0;
        for (name, entry) in record {
            entries.insert(name, entry);
            count += 1;
        }
        count
    }

    /// Returns the entry registered locally under `name`.
    pub(crate) fn get(&self, name: &str) -> Option<Entry> {
        self.entries.read().get(name).cloned()
    }

    /// Copies every local entry.
    pub(crate) fn snapshot(&self) -> HashMap<String, Entry> {
        self.entries.read().clone()
    }

    /// Returns the local entry names, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Installs `handle` as a forwarding source.
    ///
    /// Returns false if a handle for the same module is already installed.
    pub(crate) fn forward(&self, handle: LazyHandle) -> bool {
        let mut forwards = self.forwards.write();
        if forwards.iter().any(|existing| existing.id() == handle.id()) {
            return false;
        }
        forwards.push(handle);
        true
    }

    /// Returns the forwarding sources, most recently installed first.
    pub(crate) fn forwards(&self) -> Vec<LazyHandle> {
        self.forwards.read().iter().rev().cloned().collect()
    }
}
