//! Error types for the stagewire crate.
//!
//! Stage handlers fail with [`anyhow::Error`]; the pipeline surfaces those
//! failures, and its own execution outcomes, as [`FlowError`].

use crate::core::Fault;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error type for pipeline execution and construction.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// A stage handler returned an error on the main path of a run.
    #[error("Stage '{stage}' failed: {error}")]
    StageFailed {
        /// The failing stage.
        stage: String,
        /// The handler's error.
        error: Arc<anyhow::Error>,
    },

    /// A stage handler panicked.
    #[error("Stage '{stage}' panicked: {message}")]
    Panicked {
        /// The panicking stage.
        stage: String,
        /// The panic message, if it was a string.
        message: String,
    },

    /// The pipeline's admission gate refused the run.
    #[error("Run suppressed: pipeline '{pipeline}' is terminated")]
    Suppressed {
        /// The pipeline name.
        pipeline: String,
    },

    /// The run did not settle before its deadline.
    #[error("Pipeline '{pipeline}' did not settle within {deadline:?}")]
    DeadlineExceeded {
        /// The pipeline name.
        pipeline: String,
        /// The deadline that elapsed.
        deadline: Duration,
    },

    /// The pipeline was dropped while the run was still pending.
    #[error("Pipeline '{pipeline}' dropped a pending run")]
    Abandoned {
        /// The pipeline name.
        pipeline: String,
    },

    /// A combinator or pipeline was configured with invalid settings.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FlowError {
    /// Converts a failure observed on a chain into the error returned to the caller.
    ///
    /// Panics captured at the stage boundary keep their own variant.
    #[must_use]
    pub fn from_fault(fault: &Fault) -> Self {
        if let Some(panicked @ Self::Panicked { .. }) = fault.error.downcast_ref::<Self>() {
            return panicked.clone();
        }
        Self::StageFailed {
            stage: fault.stage.to_string(),
            error: fault.error.clone(),
        }
    }

    /// Returns a stable, machine-readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::StageFailed { .. } => "STAGE_FAILED",
            Self::Panicked { .. } => "STAGE_PANICKED",
            Self::Suppressed { .. } => "RUN_SUPPRESSED",
            Self::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Self::Abandoned { .. } => "RUN_ABANDONED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }

    /// Returns true if the run never executed to completion because it was
    /// refused or timed out, as opposed to a stage failing.
    #[must_use]
    pub fn is_suppression(&self) -> bool {
        matches!(self, Self::Suppressed { .. } | Self::DeadlineExceeded { .. })
    }

    /// Converts to a JSON representation for event payloads.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        match self {
            Self::StageFailed { stage, .. } | Self::Panicked { stage, .. } => {
                value["stage"] = json!(stage);
            }
            Self::DeadlineExceeded { deadline, .. } => {
                value["deadline_ms"] = json!(deadline.as_millis());
            }
            _ => {}
        }
        value
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
