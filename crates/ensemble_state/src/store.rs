//! Snapshots, patches and the batching state store.
//!
//! A [`StateStore`] holds one immutable [`Snapshot`] per module. Writes are
//! [`Patch`]es: partial records that are queued and merged in a single batched
//! flush on the next scheduler turn.
//!
//! # Flush
//!
//! The first [`set()`](StateStore::set) since the last flush defers one flush
//! task on the [`Scheduler`]. When it runs, the flush:
//!
//! 1. captures the current snapshot as `prev`
//! 2. merges every queued patch, left to right, into a draft seeded from `prev`
//! 3. replaces the current snapshot with the frozen draft
//! 4. calls each watcher, in registration order, whose key changed
//!
//! Watchers see only the final merged value of a flush, never the value of an
//! individual patch, and never fire for keys whose value is unchanged.
//!
//! # Example
//!
//! ```
//! use ensemble_state::scheduler::Scheduler;
//! use ensemble_state::store::StateStore;
//! use parking_lot::Mutex;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! let scheduler = Scheduler::new();
//! let store = StateStore::new("cart", Default::default(), scheduler.clone());
//!
//! let seen: Arc<Mutex<Vec<(Value, Value)>>> = Arc::default();
//! let log = Arc::clone(&seen);
//! store.watch("items", move |new, old| log.lock().push((new.clone(), old.clone())));
//!
//! store.set([("items", 1)]);
//! store.set([("items", 2)]);
//! scheduler.tick();
//!
//! // One notification carrying the final value.
//! assert_eq!(*seen.lock(), vec![(json!(2), Value::Null)]);
//! ```

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::scheduler::Scheduler;

/// Value reported to watchers for keys absent from a snapshot.
static ABSENT: Value = Value::Null;

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// An immutable record of state fields.
///
/// Snapshots are replaced wholesale on every flush and never mutated in place,
/// so a snapshot obtained from [`StateStore::get`] stays internally consistent
/// no matter how many flushes happen afterwards. Cloning is cheap.
#[derive(Debug, Clone, Default)]
pub struct Snapshot(Arc<Map<String, Value>>);

impl Snapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Freezes a record into a snapshot.
    #[must_use]
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(Arc::new(fields))
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Deserializes the value stored under `key`.
    ///
    /// Returns `None` if the key is absent or does not deserialize into `T`.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0.get(key).and_then(|value| T::deserialize(value).ok())
    }

    /// Returns true if the snapshot holds a value under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the snapshot has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the field names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns the underlying record.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Copies the snapshot into a JSON object value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object((*self.0).clone())
    }

    /// Returns true if both snapshots are the same allocation.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other) || self.0 == other.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Patch
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur while building a patch.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// The value a patch was built from is not a JSON object.
    #[error("state patch must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// A partial state record queued for the next flush.
///
/// # Example
///
/// ```
/// use ensemble_state::store::Patch;
/// use serde_json::json;
///
/// let patch = Patch::new().with("name", "ada").with("visits", 3);
/// assert_eq!(patch.len(), 2);
///
/// let from_json = Patch::from_value(json!({ "name": "ada", "visits": 3 })).unwrap();
/// assert_eq!(patch, from_json);
///
/// assert!(Patch::from_value(json!(42)).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch(Map<String, Value>);

impl Patch {
    /// Creates an empty patch.
    ///
    /// Setting an empty patch still schedules a flush, but no watcher fires.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field to the patch, replacing any earlier value for `key`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a field, returning the value previously queued for `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builds a patch from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::NotAnObject`] for any other kind of value.
    pub fn from_value(value: Value) -> Result<Self, PatchError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(PatchError::NotAnObject(value_kind(&other))),
        }
    }

    /// Returns the number of fields in the patch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the patch carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the queued fields.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Writes every field of the patch into `draft`.
    fn apply_to(self, draft: &mut Map<String, Value>) {
        for (key, value) in self.0 {
            draft.insert(key, value);
        }
    }
}

impl From<Map<String, Value>> for Patch {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Patch {
    fn from(fields: [(K, V); N]) -> Self {
        fields.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Patch {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl TryFrom<Value> for Patch {
    type Error = PatchError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

/// Names the kind of a JSON value for error messages.
#[must_use]
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StateStore
// ─────────────────────────────────────────────────────────────────────────────

/// Handler invoked with `(new_value, old_value)` when a watched key changes.
type WatchHandler = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// A registered per-key watcher.
#[derive(Clone)]
struct Watcher {
    key: String,
    handler: WatchHandler,
}

/// Patches waiting for the next flush.
#[derive(Default)]
struct PendingQueue {
    patches: Vec<Patch>,
    /// True while a flush task sits in the scheduler.
    scheduled: bool,
}

struct StoreInner {
    /// Name of the owning module, for diagnostics.
    label: Arc<str>,
    current: RwLock<Snapshot>,
    pending: Mutex<PendingQueue>,
    watchers: RwLock<Vec<Watcher>>,
    scheduler: Scheduler,
}

/// Batched reactive state for one module.
///
/// Cloning a `StateStore` yields another handle to the same state.
///
/// # Consistency
///
/// - [`get()`](Self::get) always returns a complete snapshot
/// - [`set()`](Self::set) never applies synchronously; a `get()` in the same
///   call stack still sees the previous snapshot
/// - every queued patch is applied on the next scheduler turn
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl StateStore {
    /// Creates a store seeded with `initial`, flushing on `scheduler`.
    #[must_use]
    pub fn new(
        label: impl Into<Arc<str>>,
        initial: Map<String, Value>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                label: label.into(),
                current: RwLock::new(Snapshot::from_map(initial)),
                pending: Mutex::new(PendingQueue::default()),
                watchers: RwLock::new(Vec::new()),
                scheduler,
            }),
        }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn get(&self) -> Snapshot {
        self.inner.current.read().clone()
    }

    /// Queues `patch` for the next flush.
    ///
    /// The first call since the last flush schedules the flush; later calls
    /// in the same turn only append to the queue.
    pub fn set(&self, patch: impl Into<Patch>) {
        let patch = patch.into();
        {
            let mut pending = self.inner.pending.lock();
            pending.patches.push(patch);
            if pending.scheduled {
                return;
            }
            pending.scheduled = true;
        }

        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.defer(move || {
            if let Some(store) = store.upgrade() {
                store.flush();
            }
        });
    }

    /// Registers `handler` for changes to `key`.
    ///
    /// The handler receives `(new_value, old_value)`. Handlers on the same
    /// key fire in registration order.
    ///
    /// Absent values are reported as `null`. Presence still counts as a
    /// change, so a key that goes from absent to an explicit `null` fires the
    /// handler with `(null, null)`. Read the snapshot with
    /// [`Snapshot::contains`] when the difference matters.
    pub fn watch(
        &self,
        key: impl Into<String>,
        handler: impl Fn(&Value, &Value) + Send + Sync + 'static,
    ) {
        self.inner.watchers.write().push(Watcher {
            key: key.into(),
            handler: Arc::new(handler),
        });
    }

    /// Returns the number of patches waiting for a flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().patches.len()
    }

    /// Returns the number of registered watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.read().len()
    }

    /// Returns the label of the owning module.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

impl core::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateStore")
            .field("label", &self.inner.label)
            .field("current", &*self.inner.current.read())
            .field("pending", &self.pending())
            .finish()
    }
}

impl StoreInner {
    fn flush(&self) {
        // Clearing `scheduled` first routes writes made by watchers below into
        // a fresh flush task.
        let patches = {
            let mut pending = self.pending.lock();
            pending.scheduled = false;
            core::mem::take(&mut pending.patches)
        };

        let (prev, next) = {
            let mut current = self.current.write();
            let prev = current.clone();
            let mut draft = prev.as_map().clone();
            let count = patches.len();
            for patch in patches {
                patch.apply_to(&mut draft);
            }
            let next = Snapshot::from_map(draft);
            *current = next.clone();
            tracing::debug!(store = %self.label, patches = count, "state flushed");
            (prev, next)
        };

        let watchers = self.watchers.read().clone();
        for watcher in watchers {
            let old = prev.get(&watcher.key);
            let new = next.get(&watcher.key);
            if old == new {
                continue;
            }
            tracing::trace!(store = %self.label, key = %watcher.key, "watcher notified");
            (watcher.handler)(new.unwrap_or(&ABSENT), old.unwrap_or(&ABSENT));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Calls = Arc<Mutex<Vec<(Value, Value)>>>;

    fn store_with(initial: Value) -> (StateStore, Scheduler) {
        let scheduler = Scheduler::new();
        let fields = match initial {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        (
            StateStore::new("test", fields, scheduler.clone()),
            scheduler,
        )
    }

    fn record(store: &StateStore, key: &str) -> Calls {
        let calls: Calls = Arc::default();
        let log = Arc::clone(&calls);
        store.watch(key, move |new, old| log.lock().push((new.clone(), old.clone())));
        calls
    }

    #[test]
    fn get_returns_initial_snapshot() {
        let (store, _) = store_with(json!({ "a": 1 }));
        assert_eq!(store.get().get("a"), Some(&json!(1)));
        assert_eq!(store.get().len(), 1);
    }

    #[test]
    fn set_is_not_synchronous() {
        let (store, scheduler) = store_with(json!({ "a": 1 }));
        store.set([("a", 2)]);

        assert_eq!(store.get().get("a"), Some(&json!(1)));
        assert_eq!(store.pending(), 1);

        scheduler.tick();
        assert_eq!(store.get().get("a"), Some(&json!(2)));
        assert_eq!(store.pending(), 0);
    }

    #[test]
    fn patches_in_one_turn_share_one_flush_task() {
        let (store, scheduler) = store_with(json!({}));
        store.set([("a", 1)]);
        store.set([("b", 2)]);
        store.set([("a", 3)]);

        assert_eq!(scheduler.pending(), 1);
        scheduler.tick();

        let snapshot = store.get();
        assert_eq!(snapshot.get("a"), Some(&json!(3)));
        assert_eq!(snapshot.get("b"), Some(&json!(2)));
    }

    #[test]
    fn batched_sets_notify_once_with_final_value() {
        let (store, scheduler) = store_with(json!({ "a": 0 }));
        let calls = record(&store, "a");

        store.set([("a", 1)]);
        store.set([("a", 2)]);
        scheduler.tick();

        assert_eq!(*calls.lock(), vec![(json!(2), json!(0))]);
    }

    #[test]
    fn empty_patch_flushes_without_notifying() {
        let (store, scheduler) = store_with(json!({ "a": 0 }));
        let calls = record(&store, "a");
        let before = store.get();

        store.set(Patch::new());
        assert_eq!(scheduler.tick(), 1);

        assert!(calls.lock().is_empty());
        assert_eq!(store.get(), before);
    }

    #[test]
    fn unchanged_value_does_not_notify() {
        let (store, scheduler) = store_with(json!({ "a": 5 }));
        let calls = record(&store, "a");

        store.set([("a", 5)]);
        scheduler.tick();

        assert!(calls.lock().is_empty());
    }

    #[test]
    fn value_restored_within_one_turn_does_not_notify() {
        let (store, scheduler) = store_with(json!({ "a": 5 }));
        let calls = record(&store, "a");

        store.set([("a", 6)]);
        store.set([("a", 5)]);
        scheduler.tick();

        assert!(calls.lock().is_empty());
    }

    #[test]
    fn watchers_on_same_key_fire_in_registration_order() {
        let (store, scheduler) = store_with(json!({}));
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            store.watch("k", move |_, _| order.lock().push(tag));
        }

        store.set([("k", true)]);
        scheduler.tick();

        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn watchers_only_fire_for_their_key() {
        let (store, scheduler) = store_with(json!({ "a": 1, "b": 1 }));
        let a_calls = record(&store, "a");
        let b_calls = record(&store, "b");

        store.set([("b", 2)]);
        scheduler.tick();

        assert!(a_calls.lock().is_empty());
        assert_eq!(*b_calls.lock(), vec![(json!(2), json!(1))]);
    }

    #[test]
    fn absent_old_value_is_reported_as_null() {
        let (store, scheduler) = store_with(json!({}));
        let calls = record(&store, "fresh");

        store.set([("fresh", "yes")]);
        scheduler.tick();

        assert_eq!(*calls.lock(), vec![(json!("yes"), Value::Null)]);
    }

    #[test]
    fn set_from_watcher_lands_in_next_flush() {
        let (store, scheduler) = store_with(json!({ "a": 0, "b": 0 }));

        let writer = store.clone();
        store.watch("a", move |new, _| {
            writer.set([("b", new.clone())]);
        });
        let b_calls = record(&store, "b");

        store.set([("a", 1)]);
        assert_eq!(scheduler.tick(), 1);

        // The write made by the watcher is queued, not applied.
        assert_eq!(store.get().get("b"), Some(&json!(0)));
        assert_eq!(store.pending(), 1);
        assert!(b_calls.lock().is_empty());

        assert_eq!(scheduler.tick(), 1);
        assert_eq!(store.get().get("b"), Some(&json!(1)));
        assert_eq!(*b_calls.lock(), vec![(json!(1), json!(0))]);
    }

    #[test]
    fn snapshots_are_never_mutated_in_place() {
        let (store, scheduler) = store_with(json!({ "a": 1 }));
        let held = store.get();

        store.set([("a", 2)]);
        scheduler.tick();

        assert_eq!(held.get("a"), Some(&json!(1)));
        assert!(!Snapshot::ptr_eq(&held, &store.get()));
    }

    #[test]
    fn dropped_store_skips_its_flush() {
        let (store, scheduler) = store_with(json!({}));
        store.set([("a", 1)]);
        drop(store);

        assert_eq!(scheduler.tick(), 1);
    }

    #[test]
    fn get_as_deserializes_fields() {
        let (store, _) = store_with(json!({ "count": 7, "tags": ["x", "y"] }));
        let snapshot = store.get();

        assert_eq!(snapshot.get_as::<u32>("count"), Some(7));
        assert_eq!(
            snapshot.get_as::<Vec<String>>("tags"),
            Some(vec!["x".to_string(), "y".to_string()])
        );
        assert_eq!(snapshot.get_as::<String>("count"), None);
        assert_eq!(snapshot.get_as::<u32>("missing"), None);
    }

    #[test]
    fn patch_from_non_object_fails() {
        let err = Patch::from_value(json!([1, 2])).unwrap_err();
        assert!(matches!(err, PatchError::NotAnObject("array")));
    }

    #[test]
    fn patch_builder_later_keys_win() {
        let patch = Patch::new().with("a", 1).with("a", 2);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.iter().next(), Some(("a", &json!(2))));
    }

    #[test]
    fn absent_to_null_fires_with_null_pair() {
        let (store, scheduler) = store_with(json!({}));
        let calls = record(&store, "flag");

        store.set([("flag", Value::Null)]);
        scheduler.tick();

        assert_eq!(*calls.lock(), vec![(Value::Null, Value::Null)]);
        assert!(store.get().contains("flag"));

        // Setting the same explicit null again is not a change.
        store.set([("flag", Value::Null)]);
        scheduler.tick();
        assert_eq!(calls.lock().len(), 1);
    }
}
