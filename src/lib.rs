//! A lightweight runtime for composing independently-written modules.
//!
//! ```
//! use ensemble::prelude::*;
//! use serde_json::json;
//!
//! let runtime = Runtime::new();
//! let math = runtime
//!     .create("math")
//!     .unwrap()
//!     .decorate("double", Method::new(|x| Ok(json!(x.as_i64().unwrap_or(0) * 2))));
//!
//! assert_eq!(math.call("double", json!(21)).unwrap(), json!(42));
//! ```

pub use ensemble_internal::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use ensemble_internal::prelude::*;
}
