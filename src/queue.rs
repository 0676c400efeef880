//! Polling queue.
//!
//! Single buffer between the capture threads and the caller. Writers never
//! block: when the ring is full the oldest queued event is discarded and
//! counted, which keeps a stalled consumer from backing up into the capture
//! path. Readers never block either; an empty queue is `None`, not an error.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use crate::event::Event;

/// Default ring capacity. A busy gaming mouse sends well under a thousand
/// reports per second, so this absorbs roughly a second of neglect.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl EventQueue {
    /// `capacity` of 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        let prealloc = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            capacity
        };
        EventQueue {
            inner: Mutex::new(VecDeque::with_capacity(prealloc)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        // A poisoned queue just means a capture thread panicked mid-push;
        // the data itself is still a valid ring.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event, shedding the oldest one if the ring is full.
    pub fn push(&self, event: Event) {
        let mut q = self.lock();
        if self.capacity != 0 && q.len() == self.capacity {
            let lost = q.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(?lost, total, "queue full, dropping oldest event");
        }
        q.push_back(event);
    }

    /// Pop the oldest pending event. Never blocks.
    pub fn poll(&self) -> Option<Event> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Events discarded to overflow since construction (or the last `clear`).
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard everything pending and reset the drop counter.
    pub fn clear(&self) {
        self.lock().clear();
        self.dropped.store(0, Ordering::Relaxed);
    }
}
