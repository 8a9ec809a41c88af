//! Subscriber setup for Ensemble's `tracing` output.
//!
//! The runtime only *emits* events: module creation, flushes and lifecycle
//! transitions at `debug`, watcher dispatch and registry merges at `trace`,
//! ignored operations at `warn`. [`TracingSetup`] installs a subscriber that
//! prints them.
//!
//! # Example
//!
//! ```
//! use ensemble_tracing::{TracingFormat, TracingSetup};
//! use tracing::Level;
//!
//! // Development: pretty output with debug level and span enter/exit
//! let dev = TracingSetup::default()
//!     .with_level(Level::DEBUG)
//!     .with_format(TracingFormat::Pretty)
//!     .with_span_events(true);
//!
//! // Production: JSON output for log aggregation
//! let prod = TracingSetup::default()
//!     .with_format(TracingFormat::Json)
//!     .with_env_filter("ensemble_state=info,ensemble_module=debug");
//!
//! # let _ = (dev, prod);
//! ```

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ─────────────────────────────────────────────────────────────────────────────
// TracingFormat
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable colored output (default).
    #[default]
    Pretty,
    /// Compact single-line output.
    Compact,
    /// JSON structured output for log aggregation.
    Json,
}

// ─────────────────────────────────────────────────────────────────────────────
// TracingSetup
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for the global `tracing` subscriber.
///
/// # Environment Filter
///
/// [`with_env_filter`](Self::with_env_filter) takes precedence over the
/// level. An unparsable filter falls back to the level.
///
/// ```
/// use ensemble_tracing::TracingSetup;
///
/// TracingSetup::default()
///     .with_env_filter("ensemble_module=trace,ensemble_state=warn")
/// # ;
/// ```
#[derive(Debug, Clone)]
pub struct TracingSetup {
    /// Maximum log level.
    level: Level,
    /// Output format.
    format: TracingFormat,
    /// Environment filter (e.g., "ensemble_module=debug").
    env_filter: Option<String>,
    /// Whether to include span events (enter/exit).
    span_events: bool,
}

impl Default for TracingSetup {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingFormat::Pretty,
            env_filter: None,
            span_events: false,
        }
    }
}

impl TracingSetup {
    /// Creates a setup with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum log level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets a custom environment filter string.
    ///
    /// Format: `target=level,target=level,...`
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Enables span enter/exit events in output.
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// Returns the configured level.
    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    /// Returns the configured format.
    #[must_use]
    pub fn format(&self) -> TracingFormat {
        self.format
    }

    /// Installs the subscriber globally.
    ///
    /// Returns false if a global subscriber was already installed; the
    /// existing one is left in place.
    pub fn init(&self) -> bool {
        let installed = match self.format {
            TracingFormat::Pretty => tracing_subscriber::registry()
                .with(self.filter())
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_span_events(self.span_events()),
                )
                .try_init()
                .is_ok(),
            TracingFormat::Compact => tracing_subscriber::registry()
                .with(self.filter())
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_span_events(self.span_events()),
                )
                .try_init()
                .is_ok(),
            TracingFormat::Json => tracing_subscriber::registry()
                .with(self.filter())
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_span_events(self.span_events()),
                )
                .try_init()
                .is_ok(),
        };

        if installed {
            tracing::info!(level = %self.level, format = ?self.format, "tracing initialized");
        }
        installed
    }

    fn filter(&self) -> EnvFilter {
        match &self.env_filter {
            Some(filter) => {
                EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
            }
            None => EnvFilter::new(self.level.as_str()),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        }
    }
}
