//! Subscriber registry connecting pipeline stages
//!
//! Each stage owns a [`Signal`] and pushes every finished artifact through
//! it. Sinks register with [`Signal::connect`] and stay registered for the
//! lifetime of the returned [`Subscription`]. Emission clones a snapshot of
//! the sink list so no lock is held while sinks run; a sink may therefore
//! subscribe or drop subscriptions from inside its callback.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Sink<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: AtomicU64,
    slots: Mutex<Vec<(u64, Sink<T>)>>,
}

/// A multi-subscriber broadcast point for one artifact type
pub struct Signal<T> {
    inner: Arc<Slots<T>>,
}

impl<T: 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Slots {
                next_id: AtomicU64::new(0),
                slots: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a sink; it is called for every artifact emitted while the
    /// returned handle is alive.
    pub fn connect<F>(&self, sink: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.slots.lock().push((id, Arc::new(sink)));

        let weak = Arc::downgrade(&self.inner);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(inner) = Weak::upgrade(&weak) {
                    inner.slots.lock().retain(|(slot_id, _)| *slot_id != id);
                }
            })),
        }
    }

    /// Deliver one artifact to every registered sink, in subscription order
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Sink<T>> = self
            .inner
            .slots
            .lock()
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();

        for sink in snapshot {
            sink(value);
        }
    }

    /// Number of currently registered sinks
    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for a registered sink; dropping it detaches the sink
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Detach explicitly (equivalent to dropping the handle)
    pub fn disconnect(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}
