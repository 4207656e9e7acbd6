//! Observability utilities.
//!
//! The crate logs through `tracing`; applications that do not install
//! their own subscriber can call [`init_tracing`].

use crate::errors::FlowError;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line, including the current span.
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    #[default]
    Compact,
}

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`, which uses the same
/// directive syntax (for example `"stagewire=debug"`).
///
/// # Errors
///
/// Returns `FlowError::InvalidConfig` if the filter does not parse or a
/// global subscriber is already installed.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> Result<(), FlowError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| FlowError::InvalidConfig(format!("invalid log filter '{default_filter}': {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).try_init(),
    };
    installed.map_err(|e| FlowError::InvalidConfig(format!("failed to initialize tracing: {e}")))
}

/// Measures the wall-clock duration of a run.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}
