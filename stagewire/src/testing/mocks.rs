//! Mock handlers for testing.
//!
//! Each mock is a cheap handle over shared state: build a [`Stage`] from it
//! with `stage(name)` and keep the mock to inspect what happened.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::Value;
use crate::stages::{Handler, Stage};

/// A handler that records every input and passes it through.
#[derive(Debug)]
pub struct RecordingStage<T> {
    calls: Arc<Mutex<Vec<(T, Instant)>>>,
}

impl<T> Clone for RecordingStage<T> {
    fn clone(&self) -> Self {
        Self {
            calls: self.calls.clone(),
        }
    }
}

impl<T> Default for RecordingStage<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Value> RecordingStage<T> {
    /// Creates a new recording handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stage backed by this handler.
    #[must_use]
    pub fn stage(&self, name: impl Into<String>) -> Stage<T> {
        Stage::new(name, Arc::new(self.clone()))
    }

    /// Returns the recorded inputs in call order.
    #[must_use]
    pub fn inputs(&self) -> Vec<T> {
        self.calls.lock().iter().map(|(v, _)| v.clone()).collect()
    }

    /// Returns when each call started.
    #[must_use]
    pub fn timestamps(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(_, at)| *at).collect()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Clears recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl<T: Value> Handler<T> for RecordingStage<T> {
    async fn call(&self, input: T) -> anyhow::Result<Option<T>> {
        self.calls.lock().push((input, Instant::now()));
        Ok(None)
    }
}

/// A handler that always fails.
#[derive(Debug, Clone)]
pub struct FailingStage {
    error: Arc<str>,
    calls: Arc<AtomicUsize>,
}

impl FailingStage {
    /// Creates a handler failing with `error`.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: Arc::from(error.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a stage backed by this handler.
    #[must_use]
    pub fn stage<T: Value>(&self, name: impl Into<String>) -> Stage<T> {
        Stage::new(name, Arc::new(self.clone()))
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Value> Handler<T> for FailingStage {
    async fn call(&self, _input: T) -> anyhow::Result<Option<T>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("{}", self.error))
    }
}

/// A handler that sleeps, then passes its input through.
#[derive(Debug, Clone, Copy)]
pub struct SlowStage {
    delay: Duration,
}

impl SlowStage {
    /// Creates a slow handler.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Creates a slow handler with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Creates a stage backed by this handler.
    #[must_use]
    pub fn stage<T: Value>(&self, name: impl Into<String>) -> Stage<T> {
        Stage::new(name, Arc::new(*self))
    }
}

#[async_trait]
impl<T: Value> Handler<T> for SlowStage {
    async fn call(&self, _input: T) -> anyhow::Result<Option<T>> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }
}

#[derive(Debug, Default)]
struct ProbeCounters {
    current: AtomicUsize,
    max: AtomicUsize,
    completed: AtomicUsize,
}

/// A slow pass-through handler that tracks how many calls overlap.
#[derive(Debug, Clone)]
pub struct ConcurrencyProbe {
    delay: Duration,
    counters: Arc<ProbeCounters>,
}

impl ConcurrencyProbe {
    /// Creates a probe whose calls each take `delay`.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            counters: Arc::new(ProbeCounters::default()),
        }
    }

    /// Creates a stage backed by this probe.
    #[must_use]
    pub fn stage<T: Value>(&self, name: impl Into<String>) -> Stage<T> {
        Stage::new(name, Arc::new(self.clone()))
    }

    /// Returns the number of calls running right now.
    #[must_use]
    pub fn current(&self) -> usize {
        self.counters.current.load(Ordering::SeqCst)
    }

    /// Returns the highest number of overlapping calls seen.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.counters.max.load(Ordering::SeqCst)
    }

    /// Returns the number of finished calls.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Value> Handler<T> for ConcurrencyProbe {
    async fn call(&self, _input: T) -> anyhow::Result<Option<T>> {
        let now = self.counters.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.counters.current.fetch_sub(1, Ordering::SeqCst);
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}
