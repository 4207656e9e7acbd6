//! Pipeline and combinator configuration.
//!
//! Configuration structs are plain serde types with defaults and builder
//! methods, so they can be embedded in an application's own config file.

use crate::errors::FlowError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a pipeline handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name used in logs, events and errors.
    pub name: String,
    /// Upper bound on how long `run` waits for a result, in milliseconds.
    pub deadline_ms: Option<u64>,
    /// Whether run lifecycle events are sent to the event sink.
    pub emit_events: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            deadline_ms: None,
            emit_events: true,
        }
    }
}

impl PipelineConfig {
    /// Creates a default config with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the run deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Enables or disables lifecycle events.
    #[must_use]
    pub fn with_events(mut self, emit: bool) -> Self {
        self.emit_events = emit;
        self
    }

    /// Returns the run deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Parses a config from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Serialization` for malformed input.
    pub fn from_json_str(json: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Configuration for a `queue` combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of worker invocations in flight.
    pub concurrency: usize,
}

impl QueueConfig {
    /// Creates a queue config.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self { concurrency }
    }

    /// Checks the config.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` when `concurrency` is zero, which
    /// would never admit anything.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.concurrency == 0 {
            return Err(FlowError::InvalidConfig(
                "queue concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a `throttle` combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Delay between one admission settling and the next admission, in milliseconds.
    pub interval_ms: u64,
}

impl ThrottleConfig {
    /// Creates a throttle config.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns the interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
