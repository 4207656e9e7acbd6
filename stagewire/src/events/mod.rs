//! Run lifecycle events.
//!
//! Every `run` emits a `started` event and exactly one terminal event to the
//! pipeline's [`EventSink`]. Events are plain serde values so sinks can ship
//! them anywhere.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::errors::FlowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of a run lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    /// The run was handed to the entry stage.
    Started,
    /// The run reached the exit stage.
    Completed,
    /// A main-path stage failed.
    Failed,
    /// The admission gate refused the run.
    Suppressed,
    /// The run did not settle before its deadline.
    DeadlineExceeded,
}

impl RunEventKind {
    /// Returns the dotted event type name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "pipeline.run.started",
            Self::Completed => "pipeline.run.completed",
            Self::Failed => "pipeline.run.failed",
            Self::Suppressed => "pipeline.run.suppressed",
            Self::DeadlineExceeded => "pipeline.run.deadline_exceeded",
        }
    }

    /// Maps a run error to its terminal event kind.
    #[must_use]
    pub fn for_error(error: &FlowError) -> Self {
        match error {
            FlowError::Suppressed { .. } => Self::Suppressed,
            FlowError::DeadlineExceeded { .. } => Self::DeadlineExceeded,
            _ => Self::Failed,
        }
    }
}

/// A run lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// What happened.
    pub kind: RunEventKind,
    /// The pipeline name.
    pub pipeline: String,
    /// The run id.
    pub run_id: Uuid,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Error details for failed, suppressed and expired runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl RunEvent {
    /// Creates an event timestamped now.
    #[must_use]
    pub fn new(kind: RunEventKind, pipeline: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            kind,
            pipeline: pipeline.into(),
            run_id,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Creates the terminal event for a run outcome.
    #[must_use]
    pub fn outcome<O>(pipeline: impl Into<String>, run_id: Uuid, result: &Result<O, FlowError>) -> Self {
        match result {
            Ok(_) => Self::new(RunEventKind::Completed, pipeline, run_id),
            Err(error) => {
                let mut event = Self::new(RunEventKind::for_error(error), pipeline, run_id);
                event.error = Some(error.to_json());
                event
            }
        }
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
