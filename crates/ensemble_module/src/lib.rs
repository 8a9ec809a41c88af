//! The module composition layer for Ensemble (Layer 2).
//!
//! `ensemble_module` turns independently-written pieces into modules with a
//! shared public surface:
//!
//! - [`runtime`] - The module set: creation, lookup, turns and shutdown
//! - [`module`] - The builder: `use`, `derive`, `decorate`, `pipe`, `chain`,
//!   `watch` and lifecycle hooks
//! - [`context`] - What a derive function sees while composing
//! - [`entry`] - Values, methods, chain steps and records
//! - [`hooks`] - Start/stop hook management
//! - [`resolver`] - Lazy handles for circular references
//! - [`config`] - Frozen per-module configuration
//! - [`error`] - Construction, composition and invocation errors
//!
//! # Architecture
//!
//! - **Layer 1** (`ensemble_state`): scheduling and state
//! - **Layer 2** (`ensemble_module`): module composition (this crate)
//!
//! # Example
//!
//! ```
//! use ensemble_module::prelude::*;
//! use serde_json::json;
//!
//! let runtime = Runtime::new();
//! let counter = runtime
//!     .module("counter")
//!     .with_state(json!({ "count": 0 }))
//!     .build()
//!     .unwrap()
//!     .derive(|ctx| {
//!         let state = ctx.state().clone();
//!         Record::new().method("increment", move |_| {
//!             let count = state.get().get_as::<i64>("count").unwrap_or(0);
//!             state.set([("count", count + 1)]);
//!             Ok(json!(count + 1))
//!         })
//!     });
//!
//! counter.call("increment", json!(null)).unwrap();
//! runtime.tick();
//!
//! assert_eq!(counter.state().get().get("count"), Some(&json!(1)));
//! ```

pub mod config;
pub mod context;
pub mod entry;
pub mod error;
pub mod hooks;
pub mod module;
mod registry;
pub mod resolver;
pub mod runtime;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::Context;
    pub use crate::entry::{Entry, Method, Outcome, Record, Step, outcome_to_value};
    pub use crate::error::{CompositionError, ConfigurationError, MethodError};
    pub use crate::hooks::{Hook, HookManager, LifecycleState};
    pub use crate::module::{Dependency, Module};
    pub use crate::resolver::LazyHandle;
    pub use crate::runtime::{ModuleId, ModuleOptions, Runtime};
    pub use ensemble_state::store::{Patch, Snapshot, StateStore};
}
