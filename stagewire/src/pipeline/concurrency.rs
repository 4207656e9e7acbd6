//! Admission control for `queue` and `throttle`.
//!
//! A [`Controller`] sits between a frontier and a worker segment. Values
//! arriving from the frontier wait in a FIFO queue until the policy admits
//! them; a slot is released when the worker segment completes or fails for
//! that value, or when the admission gate refuses it inside the worker.

use super::unit::Unit;
use super::wiring::{Chain, Wiring};
use crate::core::{RunTag, Value};
use crate::stages::Stage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// How a controller admits values into its worker segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Policy {
    /// At most `n` values in flight.
    Bounded(usize),
    /// One value in flight, and a pause of the given length after each one
    /// settles before the next is admitted.
    Spaced(Duration),
}

impl Policy {
    fn capacity(self) -> usize {
        match self {
            Self::Bounded(n) => n,
            Self::Spaced(_) => 1,
        }
    }
}

struct State<T> {
    pending: VecDeque<(RunTag, T)>,
    in_flight: Vec<RunTag>,
    draining: bool,
    cooling: bool,
}

pub(crate) struct Controller<T: Value> {
    policy: Policy,
    chain: Arc<Chain>,
    worker: Stage<T>,
    state: Mutex<State<T>>,
}

impl<T: Value> Controller<T> {
    /// Places a controlled worker segment after `source` and returns the
    /// segment's exit.
    ///
    /// The intake link holds the controller; the release subscriptions on
    /// the worker and chain only refer to it weakly.
    pub(crate) fn install(policy: Policy, wiring: &Wiring<T>, source: &Stage<T>, worker: Unit<T>) -> Stage<T> {
        let nested = wiring.nested();
        let segment = nested.assemble(worker);

        let controller = Arc::new(Self {
            policy,
            chain: wiring.chain.clone(),
            worker: segment.entry.clone(),
            state: Mutex::new(State {
                pending: VecDeque::new(),
                in_flight: Vec::new(),
                draining: false,
                cooling: false,
            }),
        });

        let weak = Arc::downgrade(&controller);
        segment.exit.completed().subscribe(move |completed| {
            if let Some(controller) = weak.upgrade() {
                controller.release(completed.tag);
            }
        });
        let weak = Arc::downgrade(&controller);
        nested.fail.subscribe(move |failed| {
            if let Some(controller) = weak.upgrade() {
                controller.release(failed.tag);
            }
        });
        let weak = Arc::downgrade(&controller);
        wiring.chain.halts.subscribe(move |tag| {
            if let Some(controller) = weak.upgrade() {
                controller.release(*tag);
            }
        });

        source.completed().subscribe(move |completed| {
            controller.enqueue(completed.tag, completed.effective_output());
        });

        segment.exit
    }

    fn enqueue(self: &Arc<Self>, tag: RunTag, value: T) {
        if !self.chain.admit(tag) {
            return;
        }
        let queued = {
            let mut state = self.state.lock();
            state.pending.push_back((tag, value));
            state.pending.len()
        };
        trace!(policy = ?self.policy, run = %tag, queued, "Value queued");
        self.drain();
    }

    /// Admits pending values while the policy allows. Only one caller drains
    /// at a time; the others leave their work to it.
    fn drain(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }

        loop {
            let next = {
                let mut state = self.state.lock();
                let blocked = state.cooling || state.in_flight.len() >= self.policy.capacity();
                let item = if blocked { None } else { state.pending.pop_front() };
                if let Some((tag, value)) = item {
                    state.in_flight.push(tag);
                    Some((tag, value, state.in_flight.len()))
                } else {
                    state.draining = false;
                    None
                }
            };

            let Some((tag, value, in_flight)) = next else {
                return;
            };
            if self.chain.admit(tag) {
                trace!(policy = ?self.policy, run = %tag, in_flight, "Value admitted");
                self.worker.trigger(tag, value);
            }
        }
    }

    fn release(self: &Arc<Self>, tag: RunTag) {
        {
            let mut state = self.state.lock();
            let Some(index) = state.in_flight.iter().position(|t| *t == tag) else {
                return;
            };
            state.in_flight.swap_remove(index);
            if matches!(self.policy, Policy::Spaced(_)) {
                state.cooling = true;
            }
        }
        trace!(policy = ?self.policy, run = %tag, "Slot released");

        match self.policy {
            Policy::Bounded(_) => self.drain(),
            Policy::Spaced(interval) => {
                let controller = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(interval).await;
                    controller.state.lock().cooling = false;
                    controller.drain();
                });
            }
        }
    }
}
