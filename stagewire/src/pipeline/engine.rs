//! Run settlement.
//!
//! A [`Terminal`] watches one pipeline exit and the chain it belongs to, and
//! resolves each pending run exactly once: with the effective output when
//! the exit completes, with the error when a stage on the run's main path
//! fails, or as suppressed when the admission gate refuses the run.

use super::wiring::Chain;
use crate::core::{Completed, Fault, RunTag, Value};
use crate::errors::FlowError;
use crate::signal::SubscriptionId;
use crate::stages::Stage;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::trace;
use uuid::Uuid;

type Settlement<O> = oneshot::Sender<Result<O, FlowError>>;

/// Pending runs of one pipeline handle, keyed by run id.
pub(crate) struct Terminal<O: Value> {
    pipeline: String,
    pending: DashMap<Uuid, Settlement<O>>,
    exit: Stage<O>,
    chain: Arc<Chain>,
    subscriptions: [SubscriptionId; 3],
}

impl<O: Value> Terminal<O> {
    /// Subscribes a new terminal to the exit's completions and the chain's
    /// faults and halts. Detached values never settle a run.
    pub(crate) fn install(pipeline: &str, exit: &Stage<O>, chain: &Arc<Chain>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let on_exit = weak.clone();
            let completed = exit.completed().subscribe(move |c: &Completed<O>| {
                if let Some(terminal) = on_exit.upgrade() {
                    if !c.tag.is_detached() {
                        terminal.settle(c.tag, Ok(c.effective_output()));
                    }
                }
            });

            let on_fault = weak.clone();
            let faulted = chain.faults.subscribe(move |fault: &Fault| {
                if let Some(terminal) = on_fault.upgrade() {
                    if !fault.tag.is_detached() {
                        terminal.settle(fault.tag, Err(FlowError::from_fault(fault)));
                    }
                }
            });

            let on_halt = weak.clone();
            let halted = chain.halts.subscribe(move |tag: &RunTag| {
                if let Some(terminal) = on_halt.upgrade() {
                    if !tag.is_detached() {
                        let error = FlowError::Suppressed {
                            pipeline: terminal.pipeline.clone(),
                        };
                        terminal.settle(*tag, Err(error));
                    }
                }
            });

            Self {
                pipeline: pipeline.to_string(),
                pending: DashMap::new(),
                exit: exit.clone(),
                chain: chain.clone(),
                subscriptions: [completed, faulted, halted],
            }
        })
    }

    /// Registers a run and returns the receiver its result arrives on.
    pub(crate) fn register(&self, run: Uuid) -> oneshot::Receiver<Result<O, FlowError>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(run, tx);
        rx
    }

    /// Resolves a pending run. Later outcomes for the same run are ignored.
    pub(crate) fn settle(&self, tag: RunTag, result: Result<O, FlowError>) {
        if let Some((_, tx)) = self.pending.remove(&tag.id()) {
            trace!(run = %tag, ok = result.is_ok(), "Run settled");
            let _ = tx.send(result);
        }
    }

    /// Drops a pending run without resolving it.
    pub(crate) fn forget(&self, run: Uuid) {
        self.pending.remove(&run);
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl<O: Value> Drop for Terminal<O> {
    fn drop(&mut self) {
        let [completed, faulted, halted] = self.subscriptions;
        self.exit.completed().unsubscribe(completed);
        self.chain.faults.unsubscribe(faulted);
        self.chain.halts.unsubscribe(halted);
    }
}
