//! Priority queue releasing events in caller-defined order

use common::Candle;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

/// Total order used by the sequencer
///
/// Items the comparator leaves tied are released in insertion order.
pub trait Sequenced: Send + 'static {
    /// `self` must be released strictly before `other`
    fn precedes(&self, other: &Self) -> bool;
}

impl Sequenced for Candle {
    fn precedes(&self, other: &Self) -> bool {
        Self::precedes(self, other)
    }
}

struct Entry<T> {
    item: T,
    seq: u64,
}

impl<T: Sequenced> Ord for Entry<T> {
    // BinaryHeap pops the greatest entry, so "released first" compares greater.
    fn cmp(&self, other: &Self) -> Ordering {
        if self.item.precedes(&other.item) {
            Ordering::Greater
        } else if other.item.precedes(&self.item) {
            Ordering::Less
        } else {
            other.seq.cmp(&self.seq)
        }
    }
}

impl<T: Sequenced> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Sequenced> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Sequenced> Eq for Entry<T> {}

struct Inner<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
    closed: bool,
}

/// Thread-safe min-heap of events
pub struct EventSequencer<T> {
    inner: Mutex<Inner<T>>,
    available: Notify,
}

impl<T: Sequenced> Default for EventSequencer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Sequenced> EventSequencer<T> {
    /// Create an empty sequencer
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty sequencer with preallocated room
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::with_capacity(capacity),
                next_seq: 0,
                closed: false,
            }),
            available: Notify::new(),
        }
    }

    /// Insert an event
    pub fn push(&self, item: T) {
        {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Entry { item, seq });
            trace!(seq, len = inner.heap.len(), "event queued");
        }
        self.available.notify_one();
    }

    /// Remove the earliest event, `None` when empty
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().heap.pop().map(|entry| entry.item)
    }

    /// Copy of the earliest event without removing it
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.lock().heap.peek().map(|entry| entry.item.clone())
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// No queued events
    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Stop waiting receivers once the queue is drained
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_one();
    }

    /// Whether [`EventSequencer::close`] was called
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Blocking-pop handle for a single consumer task
    #[must_use]
    pub fn pop_lock(self: &Arc<Self>) -> SequencerReceiver<T> {
        SequencerReceiver {
            queue: Arc::clone(self),
        }
    }
}

/// Waits for pushes and yields events in sequence order
pub struct SequencerReceiver<T> {
    queue: Arc<EventSequencer<T>>,
}

impl<T: Sequenced> SequencerReceiver<T> {
    /// Next event; suspends until one is pushed
    ///
    /// Returns `None` once the sequencer is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.queue.pop() {
                return Some(item);
            }
            if self.queue.is_closed() {
                return None;
            }
            // A push between the checks above leaves a stored permit, so no wakeup is lost.
            self.queue.available.notified().await;
        }
    }
}
