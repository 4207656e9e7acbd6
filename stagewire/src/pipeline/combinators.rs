//! Combinators deriving new pipelines from existing ones.
//!
//! Extending combinators (`then`, `filter`, `branch`, `queue`, `throttle`,
//! `repeat_while`, `pass`) return a handle whose exit is the end of the new
//! segment. The others return a handle on the unchanged frontier; the
//! values they route are detached from the run, so their outcome never
//! settles the caller.

use super::concurrency::{Controller, Policy};
use super::wiring::{shielded, Predicate, Route, Wiring};
use super::{Pipeline, Unit};
use crate::config::{QueueConfig, ThrottleConfig};
use crate::core::{Failed, Value};
use crate::errors::FlowError;
use crate::stages::Stage;
use std::sync::Arc;
use std::time::Duration;

impl<I: Value, O: Value> Pipeline<I, O> {
    /// Extends the pipeline with `units`, fed by the current exit.
    #[must_use]
    pub fn then(&self, units: impl Into<Unit<O>>) -> Self {
        let wiring = self.wiring();
        let segment = wiring.assemble(units.into());
        wiring.connect(&self.exit, Route::always(&segment.entry), false);
        self.extend(segment.exit)
    }

    /// Extends the pipeline with `units`, run only for values matching
    /// `predicate`. Other values skip the segment unchanged.
    #[must_use]
    pub fn filter<P>(&self, predicate: P, units: impl Into<Unit<O>>) -> Self
    where
        P: Fn(&O) -> bool + Send + Sync + 'static,
    {
        let wiring = self.wiring();
        let segment = wiring.assemble(units.into());
        let join = Stage::pass_through("filter");

        wiring.connect(&self.exit, Route::either(Arc::new(predicate), &segment.entry, &join), false);
        wiring.connect(&segment.exit, Route::always(&join), false);
        self.extend(join)
    }

    /// Runs `units` alongside the pipeline with every value leaving the
    /// current exit. The branch's stages report to `step` and `fail`.
    #[must_use]
    pub fn fork(&self, units: impl Into<Unit<O>>) -> Self {
        let wiring = self.wiring();
        let segment = wiring.assemble(units.into());
        wiring.connect(&self.exit, Route::always(&segment.entry), true);
        self.clone()
    }

    /// Like [`fork`](Self::fork), for values matching `predicate` only.
    #[must_use]
    pub fn fork_filter<P>(&self, predicate: P, units: impl Into<Unit<O>>) -> Self
    where
        P: Fn(&O) -> bool + Send + Sync + 'static,
    {
        let wiring = self.wiring();
        let segment = wiring.assemble(units.into());
        wiring.connect(&self.exit, Route::guarded(Arc::new(predicate), &segment.entry), true);
        self.clone()
    }

    /// Forks one independent branch per unit.
    #[must_use]
    pub fn fork_each<U>(&self, units: impl IntoIterator<Item = U>) -> Self
    where
        U: Into<Unit<O>>,
    {
        for unit in units {
            let _ = self.fork(unit);
        }
        self.clone()
    }

    /// Extends the pipeline with exactly one of two segments per value:
    /// `matched` when `predicate` holds, `mismatched` otherwise.
    #[must_use]
    pub fn branch<P>(&self, predicate: P, matched: impl Into<Unit<O>>, mismatched: impl Into<Unit<O>>) -> Self
    where
        P: Fn(&O) -> bool + Send + Sync + 'static,
    {
        let wiring = self.wiring();
        let matched = wiring.assemble(matched.into());
        let mismatched = wiring.assemble(mismatched.into());
        let join = Stage::pass_through("branch");

        wiring.connect(
            &self.exit,
            Route::either(Arc::new(predicate), &matched.entry, &mismatched.entry),
            false,
        );
        wiring.connect(&matched.exit, Route::always(&join), false);
        wiring.connect(&mismatched.exit, Route::always(&join), false);
        self.extend(join)
    }

    /// Routes each value to exactly one of two side segments without
    /// extending the pipeline.
    #[must_use]
    pub fn split<P>(&self, predicate: P, matched: impl Into<Unit<O>>, mismatched: impl Into<Unit<O>>) -> Self
    where
        P: Fn(&O) -> bool + Send + Sync + 'static,
    {
        let wiring = self.wiring();
        let matched = wiring.assemble(matched.into());
        let mismatched = wiring.assemble(mismatched.into());
        wiring.connect(
            &self.exit,
            Route::either(Arc::new(predicate), &matched.entry, &mismatched.entry),
            true,
        );
        self.clone()
    }

    /// Runs a side pipeline built from `units` with the effective output of
    /// every successful stage of the chain.
    ///
    /// The side pipeline's failures never settle the caller and do not
    /// reach this handle's [`fail`](Self::fail) or [`catch`](Self::catch);
    /// attach a `catch` to the side pipeline's own units to observe them.
    /// The same holds for [`when`](Self::when) and [`on`](Self::on).
    #[must_use]
    pub fn intercept(&self, units: impl Into<Unit<O>>) -> Self {
        self.when(|_| true, units)
    }

    /// Like [`intercept`](Self::intercept), for step outputs matching
    /// `predicate` only.
    #[must_use]
    pub fn when<P>(&self, predicate: P, units: impl Into<Unit<O>>) -> Self
    where
        P: Fn(&O) -> bool + Send + Sync + 'static,
    {
        let side = Pipeline::compose_on(self.chain.clone(), units.into());
        self.step.subscribe(move |completed| {
            let value = completed.effective_output();
            if predicate(&value) {
                side.inject(completed.tag.detach(), value);
            }
        });
        self.clone()
    }

    /// Runs a side pipeline built from `units` with each top-level input
    /// matching `predicate`, as the run starts.
    #[must_use]
    pub fn on<P>(&self, predicate: P, units: impl Into<Unit<I>>) -> Self
    where
        P: Fn(&I) -> bool + Send + Sync + 'static,
    {
        let side = Pipeline::compose_on(self.chain.clone(), units.into());
        self.entry.invoked().subscribe(move |envelope| {
            if !envelope.tag.is_detached() && predicate(&envelope.value) {
                side.inject(envelope.tag.detach(), envelope.value.clone());
            }
        });
        self.clone()
    }

    /// Runs a side pipeline built from `units` once for every stage failure
    /// of the chain, with the failing input and error. A panicking predicate
    /// or adapter counts as a failure of the stage it routes from.
    ///
    /// Only failures reported on this handle's [`fail`](Self::fail) are
    /// seen: after [`pass`](Self::pass) that is the adapted segment alone,
    /// and failures inside `intercept`, `when` or `on` side pipelines are
    /// not included.
    #[must_use]
    pub fn catch(&self, units: impl Into<Unit<Failed<O>>>) -> Self {
        let side = Pipeline::compose_on(self.chain.clone(), units.into());
        self.fail.subscribe(move |failed| {
            side.inject(failed.tag.detach(), failed.clone());
        });
        self.clone()
    }

    /// Extends the pipeline with a worker segment that runs at most
    /// `concurrency` values at once. Excess values wait in arrival order.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` when `concurrency` is zero.
    pub fn queue(&self, concurrency: usize, units: impl Into<Unit<O>>) -> Result<Self, FlowError> {
        self.queue_with(QueueConfig::new(concurrency), units)
    }

    /// Like [`queue`](Self::queue), configured from a [`QueueConfig`].
    pub fn queue_with(&self, config: QueueConfig, units: impl Into<Unit<O>>) -> Result<Self, FlowError> {
        config.validate()?;
        let exit = Controller::install(
            Policy::Bounded(config.concurrency),
            &self.wiring(),
            &self.exit,
            units.into(),
        );
        Ok(self.extend(exit))
    }

    /// Extends the pipeline with a worker segment that runs one value at a
    /// time, waiting `interval` after each one settles before the next.
    #[must_use]
    pub fn throttle(&self, interval: Duration, units: impl Into<Unit<O>>) -> Self {
        self.throttle_with(ThrottleConfig::new(interval), units)
    }

    /// Like [`throttle`](Self::throttle), configured from a [`ThrottleConfig`].
    #[must_use]
    pub fn throttle_with(&self, config: ThrottleConfig, units: impl Into<Unit<O>>) -> Self {
        let exit = Controller::install(
            Policy::Spaced(config.interval()),
            &self.wiring(),
            &self.exit,
            units.into(),
        );
        self.extend(exit)
    }

    /// Loops values through `body` while `predicate` holds, then extends the
    /// pipeline with `next`.
    ///
    /// The predicate is checked before every iteration, so a value that
    /// fails it on arrival goes straight to `next`.
    #[must_use]
    pub fn repeat_while<P>(&self, predicate: P, body: impl Into<Unit<O>>, next: impl Into<Unit<O>>) -> Self
    where
        P: Fn(&O) -> bool + Send + Sync + 'static,
    {
        let wiring = self.wiring();
        let dispatcher = Stage::pass_through("while");
        let body = wiring.assemble(body.into());
        let next = wiring.assemble(next.into());
        let predicate: Predicate<O> = Arc::new(predicate);

        wiring.connect(&self.exit, Route::always(&dispatcher), false);
        wiring.connect(&dispatcher, Route::either(predicate, &body.entry, &next.entry), false);
        wiring.connect(&body.exit, Route::back_edge(&dispatcher), false);
        self.extend(next.exit)
    }

    /// Hands each value leaving the exit through `adapter` to a segment over
    /// another value type.
    ///
    /// The returned handle shares the chain's termination gate, faults and
    /// configuration; its `step` and `fail` cover the new segment.
    #[must_use]
    pub fn pass<U, A>(&self, adapter: A, units: impl Into<Unit<U>>) -> Pipeline<I, U>
    where
        U: Value,
        A: Fn(O) -> U + Send + Sync + 'static,
    {
        let wiring = Wiring::new(self.chain.clone());
        let segment = wiring.assemble(units.into());

        let chain = self.chain.clone();
        let fail = self.fail.clone();
        let entry = segment.entry.clone();
        self.exit.completed().subscribe(move |completed| {
            if !chain.admit(completed.tag) {
                return;
            }
            let value = completed.effective_output();
            if let Some(adapted) = shielded(&chain, &fail, completed, completed.tag, &value, || adapter(value.clone())) {
                entry.trigger(completed.tag, adapted);
            }
        });

        Pipeline {
            config: self.config.clone(),
            events: self.events.clone(),
            ..Pipeline::from_parts(self.entry.clone(), segment.exit, wiring)
        }
    }
}
