//! Locked Queue
//!
//! Mutex-guarded FIFO with urgent (front) insertion, back-to-back
//! deduplication and bulk draining.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::lock::{Guarded, QueueLock};

/// Mutex-guarded queue.
///
/// Every operation except [`len`](Self::len) and
/// [`is_empty`](Self::is_empty) holds the queue's lock for its full duration.
/// Those two read a counter published after each locked operation and are
/// only suitable for heuristics and logging.
#[derive(Debug)]
pub struct LockedQueue<T> {
    items: Guarded<VecDeque<T>>,
    len: AtomicUsize,
}

impl<T> LockedQueue<T> {
    /// Create a queue guarded by a private lock
    pub fn new() -> Self {
        Self {
            items: Guarded::new(VecDeque::new(), None),
            len: AtomicUsize::new(0),
        }
    }

    /// Create a queue guarded by a caller-owned lock
    pub fn with_lock(lock: QueueLock) -> Self {
        Self {
            items: Guarded::new(VecDeque::new(), Some(lock)),
            len: AtomicUsize::new(0),
        }
    }

    /// The shared lock this queue was built with, if any
    pub fn shared_lock(&self) -> Option<&QueueLock> {
        self.items.shared_lock()
    }

    /// Append `item`, or insert it at the front when `urgent`
    pub fn push(&self, item: T, urgent: bool) {
        self.locked(|items| {
            if urgent {
                items.push_front(item);
            } else {
                items.push_back(item);
            }
        });
    }

    /// Append `item` unless the last element is equal to it per `eq`.
    ///
    /// Returns `true` if the item was appended.
    pub fn push_single_last_by<F>(&self, item: T, eq: F) -> bool
    where
        F: FnOnce(&T, &T) -> bool,
    {
        let rejected = self.locked(|items| {
            if items.back().is_some_and(|last| eq(last, &item)) {
                return Some(item);
            }
            items.push_back(item);
            None
        });
        rejected.is_none()
    }

    /// Append `item`, or merge it into the last element if they are equal.
    ///
    /// `combine` receives the last element and the incoming item and must
    /// leave the merged value in the last element. It runs under the queue
    /// lock and must not touch this queue. Returns `true` if a merge
    /// happened.
    pub fn push_single_combine_by<E, C>(&self, item: T, eq: E, combine: C) -> bool
    where
        E: FnOnce(&T, &T) -> bool,
        C: FnOnce(&mut T, T),
    {
        self.locked(|items| {
            if items.back().is_some_and(|last| eq(last, &item)) {
                if let Some(last) = items.back_mut() {
                    combine(last, item);
                }
                return true;
            }
            items.push_back(item);
            false
        })
    }

    /// Remove and return the front element
    pub fn pop(&self) -> Option<T> {
        self.locked(VecDeque::pop_front)
    }

    /// Swap the contents for an empty queue and return them in order
    pub fn pop_all(&self) -> Vec<T> {
        self.locked(std::mem::take).into()
    }

    /// Discard all pending elements.
    ///
    /// Elements are dropped after the lock is released, so their `Drop` may
    /// push into this queue.
    pub fn clear(&self) {
        let discarded = self.locked(std::mem::take);
        drop(discarded);
    }

    /// Keep only the elements matching `keep`. `keep` runs under the lock;
    /// rejected elements are dropped after it is released.
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        let removed = self.locked(|items| {
            let mut removed = Vec::new();
            let mut kept = VecDeque::with_capacity(items.len());
            for item in items.drain(..) {
                if keep(&item) {
                    kept.push_back(item);
                } else {
                    removed.push(item);
                }
            }
            *items = kept;
            removed
        });
        drop(removed);
    }

    /// Run `f` with exclusive access to the raw sequence.
    ///
    /// The lock is held for the whole call. Calling back into this queue, or
    /// into any queue sharing its lock, from `f` deadlocks.
    pub fn access_queue<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut VecDeque<T>) -> R,
    {
        self.locked(f)
    }

    /// Approximate number of pending elements (not locked)
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Approximate emptiness (not locked)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn locked<R>(&self, f: impl FnOnce(&mut VecDeque<T>) -> R) -> R {
        let mut items = self.items.lock();
        let result = f(&mut items);
        self.len.store(items.len(), Ordering::Relaxed);
        result
    }
}

impl<T: PartialEq> LockedQueue<T> {
    /// Append `item` unless the last element equals it.
    ///
    /// Collapses redundant back-to-back notifications. Returns `true` if the
    /// item was appended.
    pub fn push_single_last(&self, item: T) -> bool {
        self.push_single_last_by(item, |last, item| last == item)
    }

    /// Append `item`, or merge it into an equal last element via `combine`
    pub fn push_single_combine<C>(&self, item: T, combine: C) -> bool
    where
        C: FnOnce(&mut T, T),
    {
        self.push_single_combine_by(item, |last, item| last == item, combine)
    }
}

impl<T> Default for LockedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
