//! Graph construction: chains, segments and dataflow links.
//!
//! A link is a subscriber on one stage's completion signal that checks the
//! chain's admission gate, projects the effective output, optionally routes
//! it through a predicate, and triggers the target stage.

use super::unit::{Element, Unit};
use super::Pipeline;
use crate::core::{Completed, Failed, Fault, RunTag, Value};
use crate::errors::FlowError;
use crate::signal::Signal;
use crate::stages::{panic_message, Stage, WeakStage};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// State shared by every handle and segment derived from one composition.
pub(crate) struct Chain {
    open: AtomicBool,
    /// Failures of every stage in the chain, whatever its value type.
    pub(crate) faults: Signal<Fault>,
    /// Values refused by the admission gate.
    pub(crate) halts: Signal<RunTag>,
}

impl Chain {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            faults: Signal::new(),
            halts: Signal::new(),
        })
    }

    /// Decides whether a value may propagate. A refused value is reported
    /// on `halts` so its caller and any controller slot can settle.
    pub(crate) fn admit(&self, tag: RunTag) -> bool {
        if self.open.load(Ordering::Acquire) {
            return true;
        }
        debug!(run = %tag, "Admission refused: pipeline terminated");
        self.halts.emit(&tag);
        false
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Propagates another chain's faults and halts into this one.
    pub(crate) fn absorb(&self, other: &Self) {
        if std::ptr::eq(self, other) {
            return;
        }
        other.faults.forward_to(&self.faults);
        other.halts.forward_to(&self.halts);
    }
}

/// Predicate over a value flowing through a link.
pub(crate) type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// The stage a link delivers to. Back-edges hold a weak reference so loops
/// can be dropped.
pub(crate) enum Target<T: Value> {
    Strong(Stage<T>),
    Weak(WeakStage<T>),
}

impl<T: Value> Target<T> {
    fn resolve(&self) -> Option<Stage<T>> {
        match self {
            Self::Strong(stage) => Some(stage.clone()),
            Self::Weak(stage) => stage.upgrade(),
        }
    }
}

/// Where a link sends each value.
pub(crate) enum Route<T: Value> {
    Always(Target<T>),
    Guarded(Predicate<T>, Target<T>),
    Either {
        predicate: Predicate<T>,
        matched: Target<T>,
        mismatched: Target<T>,
    },
}

impl<T: Value> Route<T> {
    pub(crate) fn always(to: &Stage<T>) -> Self {
        Self::Always(Target::Strong(to.clone()))
    }

    pub(crate) fn guarded(predicate: Predicate<T>, to: &Stage<T>) -> Self {
        Self::Guarded(predicate, Target::Strong(to.clone()))
    }

    pub(crate) fn either(predicate: Predicate<T>, matched: &Stage<T>, mismatched: &Stage<T>) -> Self {
        Self::Either {
            predicate,
            matched: Target::Strong(matched.clone()),
            mismatched: Target::Strong(mismatched.clone()),
        }
    }

    pub(crate) fn back_edge(to: &Stage<T>) -> Self {
        Self::Always(Target::Weak(to.downgrade()))
    }

    /// Picks the target for a value; the predicate runs at most once.
    fn select(&self, value: &T) -> Option<&Target<T>> {
        match self {
            Self::Always(target) => Some(target),
            Self::Guarded(predicate, target) => predicate(value).then_some(target),
            Self::Either {
                predicate,
                matched,
                mismatched,
            } => Some(if predicate(value) { matched } else { mismatched }),
        }
    }
}

/// Runs a user routing closure (predicate or adapter) for a value leaving a
/// stage.
///
/// A panic fails the value at that stage: it is reported on `fail` and on the
/// chain's faults as `FlowError::Panicked`, and `None` is returned.
pub(crate) fn shielded<T: Value, R>(
    chain: &Chain,
    fail: &Signal<Failed<T>>,
    from: &Completed<T>,
    tag: RunTag,
    value: &T,
    call: impl FnOnce() -> R,
) -> Option<R> {
    let panic = match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => return Some(result),
        Err(panic) => panic,
    };

    let message = panic_message(panic.as_ref());
    warn!(stage = %from.stage, run = %tag, panic = %message, "Routing closure panicked");
    let failed = Failed {
        tag,
        stage: from.stage.clone(),
        input: value.clone(),
        error: Arc::new(anyhow::Error::new(FlowError::Panicked {
            stage: from.stage.to_string(),
            message,
        })),
    };
    fail.emit(&failed);
    chain.faults.emit(&Fault::from(&failed));
    None
}

/// An assembled run of stages.
pub(crate) struct Segment<T: Value> {
    pub(crate) entry: Stage<T>,
    pub(crate) exit: Stage<T>,
}

/// The aggregate signals new stages report into.
pub(crate) struct Wiring<T: Value> {
    pub(crate) chain: Arc<Chain>,
    pub(crate) step: Signal<Completed<T>>,
    pub(crate) fail: Signal<Failed<T>>,
}

impl<T: Value> Wiring<T> {
    pub(crate) fn new(chain: Arc<Chain>) -> Self {
        Self {
            chain,
            step: Signal::new(),
            fail: Signal::new(),
        }
    }

    /// A wiring with its own aggregate signals that also report into this one.
    pub(crate) fn nested(&self) -> Self {
        let nested = Self::new(self.chain.clone());
        nested.step.forward_to(&self.step);
        nested.fail.forward_to(&self.fail);
        nested
    }

    pub(crate) fn attach_stage(&self, stage: &Stage<T>) {
        stage.completed().forward_to(&self.step);
        stage.failed().forward_to(&self.fail);
        stage
            .failed()
            .relay(&self.chain.faults, |failed| Some(Fault::from(failed)));
    }

    fn attach_pipeline(&self, pipeline: &Pipeline<T>) {
        if !pipeline.step.same_as(&self.step) {
            pipeline.step.forward_to(&self.step);
        }
        if !pipeline.fail.same_as(&self.fail) {
            pipeline.fail.forward_to(&self.fail);
        }
        self.chain.absorb(&pipeline.chain);
    }

    /// Normalizes a unit into one segment, linking its elements in order.
    pub(crate) fn assemble(&self, unit: Unit<T>) -> Segment<T> {
        let mut segments = unit.flatten().into_iter().map(|element| match element {
            Element::Stage(stage) => {
                self.attach_stage(&stage);
                Segment {
                    entry: stage.clone(),
                    exit: stage,
                }
            }
            Element::Pipeline(pipeline) => {
                self.attach_pipeline(&pipeline);
                Segment {
                    entry: pipeline.entry.clone(),
                    exit: pipeline.exit.clone(),
                }
            }
        });

        let Some(first) = segments.next() else {
            let stage = Stage::pass_through("pass");
            self.attach_stage(&stage);
            return Segment {
                entry: stage.clone(),
                exit: stage,
            };
        };

        let entry = first.entry;
        let mut exit = first.exit;
        for segment in segments {
            self.connect(&exit, Route::always(&segment.entry), false);
            exit = segment.exit;
        }
        Segment { entry, exit }
    }

    /// Links `from`'s completion to the route's target. Detached links mark
    /// the values they carry as off the main path.
    pub(crate) fn connect(&self, from: &Stage<T>, route: Route<T>, detach: bool) {
        let chain = self.chain.clone();
        let fail = self.fail.clone();
        from.completed().subscribe(move |completed| {
            let tag = if detach {
                completed.tag.detach()
            } else {
                completed.tag
            };
            if !chain.admit(tag) {
                return;
            }
            let value = completed.effective_output();
            let selected = shielded(&chain, &fail, completed, tag, &value, || {
                route.select(&value).and_then(Target::resolve)
            });
            if let Some(stage) = selected.flatten() {
                stage.trigger(tag, value);
            }
        });
    }
}
