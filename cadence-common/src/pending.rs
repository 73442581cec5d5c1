//! Pending outbound event buffer
//!
//! Holds events that could not be delivered while the outbound connection is
//! down. Events are flushed in their original order on reconnect. The buffer
//! never reorders and never deduplicates; at-least-once handling belongs to
//! the receiver.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// One buffered event with the time it was queued
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry<T> {
    pub event: T,
    pub queued_at: DateTime<Utc>,
}

/// Ordered queue of not-yet-delivered events
///
/// An optional capacity bounds memory while offline; when full, the oldest
/// entry is dropped and counted in [`PendingEventBuffer::dropped`].
#[derive(Debug, Clone)]
pub struct PendingEventBuffer<T> {
    entries: VecDeque<PendingEntry<T>>,
    capacity: Option<usize>,
    dropped: u64,
}

impl<T> PendingEventBuffer<T> {
    /// Create an unbounded buffer
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: None,
            dropped: 0,
        }
    }

    /// Create a buffer holding at most `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: Some(capacity.max(1)),
            dropped: 0,
        }
    }

    /// Append an event at the back of the queue
    pub fn push(&mut self, event: T) {
        if let Some(cap) = self.capacity {
            while self.entries.len() >= cap {
                self.entries.pop_front();
                self.dropped += 1;
            }
        }
        self.entries.push_back(PendingEntry {
            event,
            queued_at: crate::time::now(),
        });
    }

    /// Deliver buffered events front to back through `send`
    ///
    /// Stops at the first event `send` rejects; that event and everything
    /// behind it stay queued in order. Returns the number delivered together
    /// with the rejection, if any.
    pub fn flush<E, F>(&mut self, mut send: F) -> (usize, Option<E>)
    where
        F: FnMut(&T) -> Result<(), E>,
    {
        let mut delivered = 0;
        while let Some(entry) = self.entries.front() {
            if let Err(e) = send(&entry.event) {
                return (delivered, Some(e));
            }
            self.entries.pop_front();
            delivered += 1;
        }
        (delivered, None)
    }

    /// Remove and return every entry in order
    pub fn drain(&mut self) -> Vec<PendingEntry<T>> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries discarded because the capacity was reached
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Age of the oldest queued entry
    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.entries.front().map(|e| e.queued_at)
    }
}

impl<T> Default for PendingEventBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
