//! Scoped fan-out subscriptions.
//!
//! Every publisher in this crate (device sessions, the scanner, the fleet
//! manager) keeps a [`Subscribers`] registry inside its own task and hands
//! out [`Subscription`] handles. Each handle owns an unbounded queue; when
//! the handle is dropped, on any path including a panicking consumer, it
//! tells the owning task to forget it.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;

/// Receiving end of one subscription.
///
/// Dropping the handle deregisters it from the publisher.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    release: Option<Box<dyn FnOnce(u64) + Send>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        id: u64,
        rx: mpsc::UnboundedReceiver<T>,
        release: impl FnOnce(u64) + Send + 'static,
    ) -> Self {
        Self {
            id,
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// Publisher-assigned id, unique for the publisher's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the publisher has shut down and every queued
    /// item has been consumed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next queued item without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.id);
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

struct Entry<T, F> {
    filter: F,
    tx: mpsc::UnboundedSender<T>,
}

/// Registry of live subscriptions, owned by the publishing task.
///
/// `F` is a per-subscriber filter value handed to the predicate passed to
/// [`publish`](Self::publish); device sessions use `bool` ("wants meters").
pub(crate) struct Subscribers<T, F = ()> {
    next_id: u64,
    entries: HashMap<u64, Entry<T, F>>,
}

impl<T: Clone, F> Subscribers<T, F> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    /// Register a subscriber and return its id and queue.
    ///
    /// Entries whose queue was dropped without a release are pruned first.
    pub(crate) fn add(&mut self, filter: F) -> (u64, mpsc::UnboundedReceiver<T>) {
        self.entries.retain(|_, entry| !entry.tx.is_closed());
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries.insert(id, Entry { filter, tx });
        (id, rx)
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Number of subscribers whose queue is still open.
    pub(crate) fn len(&self) -> usize {
        self.entries.values().filter(|entry| !entry.tx.is_closed()).count()
    }

    /// Deliver `item` to every subscriber whose filter passes `accept`.
    ///
    /// Subscribers whose queue is gone are pruned.
    pub(crate) fn publish(&mut self, item: &T, accept: impl Fn(&F) -> bool) {
        self.entries.retain(|id, entry| {
            if !accept(&entry.filter) {
                return true;
            }
            let delivered = entry.tx.send(item.clone()).is_ok();
            if !delivered {
                tracing::trace!(subscription = id, "Pruning closed subscription");
            }
            delivered
        });
    }
}
