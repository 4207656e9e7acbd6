//! Pipeline composition and execution.
//!
//! This module provides:
//! - [`compose`], which links stage-like [`Unit`]s into a [`Pipeline`]
//! - Combinators that derive new pipelines from existing ones
//! - Queue and throttle concurrency controllers
//! - Run execution with suppression, deadlines and lifecycle events
//!
//! A `Pipeline` is an immutable handle on a frontier of a dataflow graph.
//! Extension combinators return a new handle with a new exit and leave the
//! receiver untouched, but every handle derived from one composition shares
//! the same links, aggregate signals and termination gate. Extending the same
//! handle twice links two successors to its exit, and both then run on the
//! main path; build each path from its own handle instead.

mod combinators;
mod concurrency;
mod engine;
mod unit;
mod wiring;

#[cfg(test)]
mod integration_tests;

pub use unit::Unit;

use crate::config::PipelineConfig;
use crate::core::{Completed, Failed, RunTag, Value};
use crate::errors::FlowError;
use crate::events::{EventSink, NoOpEventSink, RunEvent, RunEventKind};
use crate::observability::SpanTimer;
use crate::signal::Signal;
use crate::stages::Stage;
use engine::Terminal;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use wiring::{Chain, Wiring};

/// Builds a pipeline from stage-like units, linked in order.
///
/// An empty unit produces a single pass-through stage.
///
/// # Example
///
/// ```rust,ignore
/// use stagewire::prelude::*;
///
/// let pipeline = compose(vec![
///     Stage::map("double", |n: i32| n * 2),
///     Stage::map("increment", |n: i32| n + 1),
/// ]);
/// assert_eq!(pipeline.run(5).await?, 11);
/// ```
pub fn compose<T: Value>(units: impl Into<Unit<T>>) -> Pipeline<T> {
    Pipeline::compose(units)
}

/// A composed, invocable graph of stages from `I` at the entry to `O` at the
/// exit.
pub struct Pipeline<I: Value, O: Value = I> {
    entry: Stage<I>,
    exit: Stage<O>,
    step: Signal<Completed<O>>,
    fail: Signal<Failed<O>>,
    chain: Arc<Chain>,
    config: Arc<PipelineConfig>,
    events: Arc<dyn EventSink>,
    terminal: Arc<OnceLock<Arc<Terminal<O>>>>,
}

impl<I: Value, O: Value> Clone for Pipeline<I, O> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            exit: self.exit.clone(),
            step: self.step.clone(),
            fail: self.fail.clone(),
            chain: self.chain.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            terminal: self.terminal.clone(),
        }
    }
}

impl<I: Value, O: Value> fmt::Debug for Pipeline<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.config.name)
            .field("entry", &self.entry.name())
            .field("exit", &self.exit.name())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl<T: Value> Pipeline<T> {
    /// Builds a pipeline on a fresh chain. See [`compose`].
    pub fn compose(units: impl Into<Unit<T>>) -> Self {
        Self::compose_on(Chain::new(), units.into())
    }

    /// Builds a pipeline on an existing chain, with its own aggregate signals.
    pub(crate) fn compose_on(chain: Arc<Chain>, unit: Unit<T>) -> Self {
        let wiring = Wiring::new(chain);
        let segment = wiring.assemble(unit);
        Self::from_parts(segment.entry, segment.exit, wiring)
    }
}

impl<I: Value, O: Value> Pipeline<I, O> {
    pub(crate) fn from_parts(entry: Stage<I>, exit: Stage<O>, wiring: Wiring<O>) -> Self {
        Self {
            entry,
            exit,
            step: wiring.step,
            fail: wiring.fail,
            chain: wiring.chain,
            config: Arc::new(PipelineConfig::default()),
            events: Arc::new(NoOpEventSink),
            terminal: Arc::new(OnceLock::new()),
        }
    }

    /// Returns a handle using the given configuration.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Returns a handle with a different name.
    #[must_use]
    pub fn named(self, name: impl Into<String>) -> Self {
        let config = PipelineConfig {
            name: name.into(),
            ..(*self.config).clone()
        };
        self.with_config(config)
    }

    /// Returns a handle reporting run lifecycle events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the entry stage.
    ///
    /// Linking to or triggering internal stages directly bypasses the
    /// pipeline's admission gate and run settlement. Prefer combinators.
    #[must_use]
    pub fn entry(&self) -> &Stage<I> {
        &self.entry
    }

    /// Returns the exit stage of this handle.
    ///
    /// Linking directly to the exit of a pipeline that is also nested
    /// elsewhere is unsupported; compose the pipeline as a unit instead.
    #[must_use]
    pub fn exit(&self) -> &Stage<O> {
        &self.exit
    }

    /// Fires on every successful stage of the chain, in chain order and
    /// depth-first through nested pipelines.
    ///
    /// After [`pass`](Self::pass) this covers the adapted segment only.
    #[must_use]
    pub fn step(&self) -> &Signal<Completed<O>> {
        &self.step
    }

    /// Fires on every stage failure of the chain.
    #[must_use]
    pub fn fail(&self) -> &Signal<Failed<O>> {
        &self.fail
    }

    /// Closes the admission gate. Values already inside a stage finish that
    /// stage; nothing propagates further, and pending runs settle as
    /// suppressed when their next link refuses them.
    pub fn terminate(&self) {
        info!(pipeline = %self.config.name, "Terminating pipeline");
        self.chain.set_open(false);
    }

    /// Reopens the admission gate for future propagation.
    pub fn resume(&self) {
        info!(pipeline = %self.config.name, "Resuming pipeline");
        self.chain.set_open(true);
    }

    /// Returns true if the admission gate is closed.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        !self.chain.is_open()
    }

    /// Runs one input through the pipeline and waits for its result.
    ///
    /// Honors the configured deadline, if any.
    ///
    /// # Errors
    ///
    /// - `FlowError::StageFailed` or `FlowError::Panicked` when a stage on
    ///   the run's main path fails
    /// - `FlowError::Suppressed` when the admission gate refuses the run
    /// - `FlowError::DeadlineExceeded` when a configured deadline elapses
    pub async fn run(&self, input: I) -> Result<O, FlowError> {
        self.execute(input, self.config.deadline()).await
    }

    /// Runs one input, giving up after `deadline`.
    ///
    /// The run itself is not cancelled; its eventual result is discarded.
    pub async fn run_with_deadline(&self, input: I, deadline: Duration) -> Result<O, FlowError> {
        self.execute(input, Some(deadline)).await
    }

    async fn execute(&self, input: I, deadline: Option<Duration>) -> Result<O, FlowError> {
        let tag = RunTag::new();
        let terminal = self.terminal();
        let rx = terminal.register(tag.id());
        let timer = SpanTimer::start();

        debug!(pipeline = %self.config.name, run = %tag, "Run started");
        self.emit(RunEvent::new(RunEventKind::Started, self.config.name.clone(), tag.id()))
            .await;

        if self.chain.admit(tag) {
            self.entry.trigger(tag, input);
        }

        let abandoned = || FlowError::Abandoned {
            pipeline: self.config.name.clone(),
        };
        let result = match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(settled) => settled.unwrap_or_else(|_| Err(abandoned())),
                Err(_) => {
                    terminal.forget(tag.id());
                    Err(FlowError::DeadlineExceeded {
                        pipeline: self.config.name.clone(),
                        deadline,
                    })
                }
            },
            None => rx.await.unwrap_or_else(|_| Err(abandoned())),
        };

        let duration_ms = timer.elapsed_ms();
        match &result {
            Ok(_) => debug!(pipeline = %self.config.name, run = %tag, duration_ms, "Run completed"),
            Err(e) if e.is_suppression() => {
                debug!(pipeline = %self.config.name, run = %tag, duration_ms, error = %e, "Run suppressed");
            }
            Err(e) => warn!(pipeline = %self.config.name, run = %tag, duration_ms, error = %e, "Run failed"),
        }
        self.emit(RunEvent::outcome(self.config.name.clone(), tag.id(), &result))
            .await;

        result
    }

    async fn emit(&self, event: RunEvent) {
        if self.config.emit_events {
            self.events.emit(event).await;
        }
    }

    fn terminal(&self) -> &Arc<Terminal<O>> {
        self.terminal
            .get_or_init(|| Terminal::install(&self.config.name, &self.exit, &self.chain))
    }

    /// Delivers a value to the entry as part of an existing run, subject to
    /// the admission gate.
    pub(crate) fn inject(&self, tag: RunTag, input: I) {
        if self.chain.admit(tag) {
            self.entry.trigger(tag, input);
        }
    }

    /// The aggregate signals new stages of this handle report into.
    pub(crate) fn wiring(&self) -> Wiring<O> {
        Wiring {
            chain: self.chain.clone(),
            step: self.step.clone(),
            fail: self.fail.clone(),
        }
    }

    /// A handle on the same chain with a new exit.
    pub(crate) fn extend(&self, exit: Stage<O>) -> Self {
        Self {
            exit,
            terminal: Arc::new(OnceLock::new()),
            ..self.clone()
        }
    }
}
