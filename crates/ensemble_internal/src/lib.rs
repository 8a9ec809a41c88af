//! # Ensemble Internal Library
//!
//! Re-exports the core Ensemble crates for convenience.

/// Layer 1: scheduler and reactive state store.
pub use ensemble_state;

/// Layer 2: module composition, lifecycle hooks and lazy resolution.
pub use ensemble_module;

/// Subscriber setup for the `tracing` output emitted by the runtime.
#[cfg(feature = "tracing")]
pub use ensemble_tracing;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use ensemble_module::prelude::*;
    pub use ensemble_state::prelude::*;
}
