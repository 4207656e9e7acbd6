//! Signal payloads emitted by stages.

use super::RunTag;
use std::sync::Arc;

/// A value entering a stage, together with its run tag.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    /// The run the value belongs to.
    pub tag: RunTag,
    /// The value itself.
    pub value: T,
}

impl<T> Envelope<T> {
    /// Creates a new envelope.
    pub fn new(tag: RunTag, value: T) -> Self {
        Self { tag, value }
    }
}

/// Fired by a stage when its handler succeeds.
#[derive(Debug, Clone)]
pub struct Completed<T> {
    /// The run the invocation belongs to.
    pub tag: RunTag,
    /// Name of the stage that completed.
    pub stage: Arc<str>,
    /// The value the stage was invoked with.
    pub input: T,
    /// The value the handler returned, `None` for a void result.
    pub output: Option<T>,
}

impl<T: Clone> Completed<T> {
    /// Returns the effective output: the returned value, or the input when
    /// the handler returned nothing.
    #[must_use]
    pub fn effective_output(&self) -> T {
        self.output.clone().unwrap_or_else(|| self.input.clone())
    }

    /// Returns true if the handler returned nothing.
    #[must_use]
    pub fn is_pass_through(&self) -> bool {
        self.output.is_none()
    }
}

/// Fired by a stage when its handler fails.
#[derive(Debug, Clone)]
pub struct Failed<T> {
    /// The run the invocation belongs to.
    pub tag: RunTag,
    /// Name of the stage that failed.
    pub stage: Arc<str>,
    /// The value the stage was invoked with.
    pub input: T,
    /// The handler's error.
    pub error: Arc<anyhow::Error>,
}

/// A type-erased failure, shared by every segment of a chain regardless of
/// the value type flowing through it.
#[derive(Debug, Clone)]
pub struct Fault {
    /// The run the failing invocation belongs to.
    pub tag: RunTag,
    /// Name of the stage that failed.
    pub stage: Arc<str>,
    /// The handler's error.
    pub error: Arc<anyhow::Error>,
}

impl<T> From<&Failed<T>> for Fault {
    fn from(failed: &Failed<T>) -> Self {
        Self {
            tag: failed.tag,
            stage: failed.stage.clone(),
            error: failed.error.clone(),
        }
    }
}
