//! Broadcast signals.
//!
//! A [`Signal`] is a list of subscribers that are called, in subscription
//! order, every time a payload is emitted. Stages and pipelines expose their
//! lifecycle (invocation, completion, failure) as signals, and dataflow links
//! are nothing more than subscribers that trigger the next stage.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A subscriber callback.
pub type Subscriber<P> = Arc<dyn Fn(&P) + Send + Sync>;

/// Handle returned by [`Signal::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct SignalInner<P> {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber<P>)>>,
}

/// A broadcastable notification carrying a payload of type `P`.
///
/// Cloning a signal yields another handle to the same subscriber list.
pub struct Signal<P> {
    inner: Arc<SignalInner<P>>,
}

impl<P> Clone for Signal<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> Default for Signal<P> {
    fn default() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                next_id: AtomicU64::new(0),
                subscribers: RwLock::new(Vec::new()),
            }),
        }
    }
}

impl<P: 'static> fmt::Debug for Signal<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<P: 'static> Signal<P> {
    /// Creates a signal with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. It is called for every payload emitted after
    /// this call returns.
    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .write()
            .push((id, Arc::new(subscriber)));
        id
    }

    /// Removes a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Delivers a payload to every subscriber in subscription order.
    ///
    /// Subscribers registered while the payload is being delivered only see
    /// later payloads. A panicking subscriber is logged and skipped.
    pub fn emit(&self, payload: &P) {
        let snapshot: Vec<Subscriber<P>> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|(_, s)| s.clone())
            .collect();

        for subscriber in snapshot {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber(payload);
            })) {
                warn!("Signal subscriber panicked: {:?}", e);
            }
        }
    }

    /// Re-emits every payload of this signal on `target`.
    pub fn forward_to(&self, target: &Self) -> SubscriptionId {
        let target = target.clone();
        self.subscribe(move |payload| target.emit(payload))
    }

    /// Re-emits the projection of every payload on `target`, skipping
    /// payloads the projection maps to `None`.
    pub fn relay<Q, F>(&self, target: &Signal<Q>, project: F) -> SubscriptionId
    where
        Q: 'static,
        F: Fn(&P) -> Option<Q> + Send + Sync + 'static,
    {
        let target = target.clone();
        self.subscribe(move |payload| {
            if let Some(projected) = project(payload) {
                target.emit(&projected);
            }
        })
    }

    /// Returns the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Returns true if both handles refer to the same signal.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
