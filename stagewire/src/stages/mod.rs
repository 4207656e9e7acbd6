//! Stages and stage handlers.
//!
//! A [`Stage`] is the single asynchronous unit of work in a pipeline. It wraps
//! a [`Handler`] and reports every invocation on exactly one of its completion
//! or failure signals.

mod handler;

pub use handler::{AsyncFnHandler, Handler, IntoOutput, SyncFnHandler};

use crate::core::{Completed, Envelope, Failed, RunTag, Value};
use crate::errors::FlowError;
use crate::signal::Signal;
use futures::FutureExt;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug_span, trace, warn, Instrument};

struct StageInner<T: Value> {
    name: Arc<str>,
    handler: Arc<dyn Handler<T>>,
    invoked: Signal<Envelope<T>>,
    completed: Signal<Completed<T>>,
    failed: Signal<Failed<T>>,
}

/// A single asynchronous processing step.
///
/// Stages are immutable once created; cloning returns another handle to the
/// same stage and the same signals. Placing one stage at two positions of a
/// graph links it twice, so build a fresh stage per position.
pub struct Stage<T: Value> {
    inner: Arc<StageInner<T>>,
}

impl<T: Value> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Value> Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.inner.name)
            .finish()
    }
}

impl<T: Value> Stage<T> {
    /// Creates a stage from a shared handler.
    pub fn new(name: impl Into<String>, handler: Arc<dyn Handler<T>>) -> Self {
        Self {
            inner: Arc::new(StageInner {
                name: Arc::from(name.into()),
                handler,
                invoked: Signal::new(),
                completed: Signal::new(),
                failed: Signal::new(),
            }),
        }
    }

    /// Creates a stage from an async closure.
    ///
    /// The closure may return `Option<T>`, `()` or a `Result` of either; see
    /// [`IntoOutput`].
    pub fn from_fn<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutput<T>,
    {
        Self::new(name, Arc::new(AsyncFnHandler::new(func)))
    }

    /// Creates a stage from a synchronous closure.
    pub fn from_sync<F, R>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T) -> R + Send + Sync + 'static,
        R: IntoOutput<T> + 'static,
    {
        Self::new(name, Arc::new(SyncFnHandler::new(func)))
    }

    /// Creates a stage that always returns `func(input)`.
    pub fn map<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        Self::from_sync(name, move |input| Some(func(input)))
    }

    /// Creates a stage that observes its input and passes it through.
    pub fn inspect<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self::from_sync(name, move |input: T| func(&input))
    }

    /// Creates a stage that does nothing and passes its input through.
    pub fn pass_through(name: impl Into<String>) -> Self {
        Self::from_sync(name, |_: T| ())
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Fires with the input each time the stage is triggered.
    #[must_use]
    pub fn invoked(&self) -> &Signal<Envelope<T>> {
        &self.inner.invoked
    }

    /// Fires with `{input, output}` when the handler succeeds.
    #[must_use]
    pub fn completed(&self) -> &Signal<Completed<T>> {
        &self.inner.completed
    }

    /// Fires with `{input, error}` when the handler fails or panics.
    #[must_use]
    pub fn failed(&self) -> &Signal<Failed<T>> {
        &self.inner.failed
    }

    /// Returns true if both handles refer to the same stage.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakStage<T> {
        WeakStage {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Starts one invocation of the stage on the tokio runtime.
    ///
    /// This is the low-level primitive links are built from; triggering a
    /// stage that belongs to a pipeline bypasses the pipeline's admission
    /// gate. Must be called from within a tokio runtime.
    pub fn trigger(&self, tag: RunTag, input: T) {
        self.inner.invoked.emit(&Envelope::new(tag, input.clone()));

        let stage = self.clone();
        let span = debug_span!("stage", stage = %self.inner.name, run = %tag);
        tokio::spawn(async move { stage.execute(tag, input).await }.instrument(span));
    }

    async fn execute(&self, tag: RunTag, input: T) {
        let outcome = std::panic::AssertUnwindSafe(self.inner.handler.call(input.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => {
                trace!(pass_through = output.is_none(), "Stage completed");
                self.inner.completed.emit(&Completed {
                    tag,
                    stage: self.inner.name.clone(),
                    input,
                    output,
                });
            }
            Ok(Err(error)) => {
                warn!(error = %error, "Stage failed");
                self.fail(tag, input, error);
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(panic = %message, "Stage panicked");
                let error = anyhow::Error::new(FlowError::Panicked {
                    stage: self.inner.name.to_string(),
                    message,
                });
                self.fail(tag, input, error);
            }
        }
    }

    fn fail(&self, tag: RunTag, input: T, error: anyhow::Error) {
        self.inner.failed.emit(&Failed {
            tag,
            stage: self.inner.name.clone(),
            input,
            error: Arc::new(error),
        });
    }
}

/// A non-owning stage handle, used for back-edges so loops do not leak.
pub(crate) struct WeakStage<T: Value> {
    inner: Weak<StageInner<T>>,
}

impl<T: Value> WeakStage<T> {
    pub(crate) fn upgrade(&self) -> Option<Stage<T>> {
        self.inner.upgrade().map(|inner| Stage { inner })
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
