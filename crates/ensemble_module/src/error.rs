//! Error types for module construction, composition and invocation.

/// Error creating a module.
///
/// Raised by [`ModuleOptions::build()`](crate::runtime::ModuleOptions::build)
/// before any state is allocated for the module.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// The module name is empty.
    #[error("module name must not be empty")]
    MissingName,

    /// The initial state is not a JSON object.
    #[error("initial state of module '{module}' must be a JSON object, got {kind}")]
    InvalidState {
        /// The module being created.
        module: String,
        /// The kind of value that was supplied.
        kind: &'static str,
    },

    /// The config is not a JSON object.
    #[error("config of module '{module}' must be a JSON object, got {kind}")]
    InvalidConfig {
        /// The module being created.
        module: String,
        /// The kind of value that was supplied.
        kind: &'static str,
    },
}

/// Error registering an entry through `pipe` or `chain`.
#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
    /// The factory produced a plain value instead of a callable.
    #[error("`{name}` on module '{module}' must be callable, got a {kind}")]
    NotCallable {
        /// The module being composed.
        module: String,
        /// The entry name.
        name: String,
        /// The kind of entry the factory produced.
        kind: &'static str,
    },

    /// The factory for a chain produced a callable that does not return a result.
    #[error("`{name}` on module '{module}' must be a result-returning step, got a {kind}")]
    NotChainable {
        /// The module being composed.
        module: String,
        /// The entry name.
        name: String,
        /// The kind of entry the factory produced.
        kind: &'static str,
    },
}

/// Error invoking a module entry.
///
/// Errors raised inside method bodies travel through
/// [`Module::call()`](crate::module::Module::call) unmodified.
#[derive(Debug, thiserror::Error)]
pub enum MethodError {
    /// No entry with this name is visible on the module.
    #[error("no entry named `{name}` on module '{module}'")]
    NotFound {
        /// The module that was searched.
        module: String,
        /// The missing entry name.
        name: String,
    },

    /// The entry is a plain value.
    #[error("entry `{name}` on module '{module}' is a value, not a method")]
    NotCallable {
        /// The module owning the entry.
        module: String,
        /// The entry name.
        name: String,
    },

    /// The entry is not a result-returning step.
    #[error("entry `{name}` on module '{module}' is not a chain step")]
    NotChainable {
        /// The module owning the entry.
        module: String,
        /// The entry name.
        name: String,
    },

    /// A lazy handle outlived the runtime that owns its module.
    #[error("module '{module}' is no longer reachable")]
    Unresolved {
        /// The module the handle points to.
        module: String,
    },

    /// A method body failed with a message.
    #[error("{0}")]
    Failed(String),

    /// A method body failed with another error.
    #[error(transparent)]
    Other(#[from] Box<dyn core::error::Error + Send + Sync>),
}

impl MethodError {
    /// Creates a [`MethodError::Failed`] from a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
