//! The reactive state layer for Ensemble (Layer 1).
//!
//! `ensemble_state` provides the two primitives every module's state sits on:
//!
//! - [`scheduler`] - A cooperative, single-threaded deferred-task queue
//! - [`store`] - Immutable snapshots, batched patches and per-key watchers
//!
//! # Architecture
//!
//! - **Layer 1** (`ensemble_state`): scheduling and state (this crate)
//! - **Layer 2** (`ensemble_module`): module composition, hooks, lazy handles
//!
//! # Example
//!
//! ```
//! use ensemble_state::scheduler::Scheduler;
//! use ensemble_state::store::{Patch, StateStore};
//! use serde_json::json;
//!
//! let scheduler = Scheduler::new();
//! let store = StateStore::new("counter", Default::default(), scheduler.clone());
//!
//! store.set([("count", 1)]);
//! store.set([("count", 2)]);
//!
//! // Nothing is applied until the scheduler runs a turn.
//! assert!(store.get().get("count").is_none());
//!
//! scheduler.tick();
//! assert_eq!(store.get().get("count"), Some(&json!(2)));
//! # let _ = Patch::new();
//! ```

/// Cooperative deferred-task queue.
pub mod scheduler;

/// Snapshots, patches and the batching state store.
pub mod store;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::scheduler::*;
    pub use crate::store::*;
}
