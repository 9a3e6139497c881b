//! Locked Queue With Single
//!
//! Locked queue whose entries may carry a key. At most one keyed entry per
//! key is pending at any time; re-pushing a key either replaces the pending
//! value in place or moves the new value to the back. A key index over the
//! slab-backed list makes both O(1).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::lock::{Guarded, QueueLock};
use crate::node_list::{NodeId, NodeList};

#[derive(Debug)]
struct Slot<K, T> {
    key: Option<K>,
    value: T,
}

#[derive(Debug)]
struct SingleState<K, T> {
    list: NodeList<Slot<K, T>>,
    index: HashMap<K, NodeId>,
}

/// Locked queue with a per-key single-pending-entry index.
///
/// Unkeyed entries behave exactly like a [`LockedQueue`](crate::LockedQueue).
/// The index and the list are consistent whenever a public operation
/// returns.
#[derive(Debug)]
pub struct LockedQueueWithSingle<K, T> {
    state: Guarded<SingleState<K, T>>,
    len: AtomicUsize,
}

impl<K, T> LockedQueueWithSingle<K, T>
where
    K: Eq + Hash + Clone,
{
    /// Create a queue guarded by a private lock
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a queue guarded by a caller-owned lock
    pub fn with_lock(lock: QueueLock) -> Self {
        Self::build(Some(lock))
    }

    fn build(lock: Option<QueueLock>) -> Self {
        let state = SingleState {
            list: NodeList::new(),
            index: HashMap::new(),
        };
        Self {
            state: Guarded::new(state, lock),
            len: AtomicUsize::new(0),
        }
    }

    /// The shared lock this queue was built with, if any
    pub fn shared_lock(&self) -> Option<&QueueLock> {
        self.state.shared_lock()
    }

    /// Push an unkeyed entry; `urgent` inserts at the front
    pub fn push(&self, item: T, urgent: bool) {
        self.access_queue(|view| view.push(item, urgent));
    }

    /// Push `item` as the single pending entry for `key`.
    ///
    /// If `key` is already pending, `append_if_exists` selects between moving
    /// the new value to the back (`true`) and overwriting the pending value
    /// in place (`false`). Returns `true` if an existing entry was replaced.
    pub fn push_single(&self, key: K, item: T, append_if_exists: bool) -> bool {
        let displaced = self.access_queue(|view| view.push_single(key, item, append_if_exists));
        displaced.is_some()
    }

    /// Push `item` for `key` at the front.
    ///
    /// If `key` is already pending, that pending value is kept, moved to the
    /// front, and `item` is dropped. Returns `true` in that case.
    pub fn push_single_urgent(&self, key: K, item: T) -> bool {
        let dropped = self.access_queue(|view| view.push_single_urgent(key, item));
        dropped.is_some()
    }

    /// Remove and return the front entry
    pub fn pop(&self) -> Option<T> {
        self.access_queue(|view| view.pop())
    }

    /// Remove and return the front entry with its key
    pub fn pop_keyed(&self) -> Option<(Option<K>, T)> {
        self.access_queue(|view| view.pop_keyed())
    }

    /// Drain everything in order
    pub fn pop_all(&self) -> Vec<T> {
        self.access_queue(|view| view.pop_all())
    }

    /// Discard all entries and the key index.
    ///
    /// Entries are dropped after the lock is released.
    pub fn clear(&self) {
        let discarded = self.access_queue(|view| view.pop_all());
        drop(discarded);
    }

    /// Whether `key` has a pending entry
    pub fn contains_key(&self, key: &K) -> bool {
        self.access_queue(|view| view.contains_key(key))
    }

    /// Remove the pending entry for `key`
    pub fn remove_key(&self, key: &K) -> Option<T> {
        self.access_queue(|view| view.remove_key(key))
    }

    /// Move the pending entry for `key` to the front
    pub fn make_urgent_key(&self, key: &K) -> bool {
        self.access_queue(|view| view.make_urgent_key(key))
    }

    /// Whether any pending entry matches `pred`
    pub fn contains_where<P>(&self, pred: P) -> bool
    where
        P: FnMut(&T) -> bool,
    {
        self.access_queue(|view| view.contains_where(pred))
    }

    /// Remove the first pending entry matching `pred`
    pub fn remove_where<P>(&self, pred: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        self.access_queue(|view| view.remove_where(pred))
    }

    /// Move the first pending entry matching `pred` to the front
    pub fn make_urgent_where<P>(&self, pred: P) -> bool
    where
        P: FnMut(&T) -> bool,
    {
        self.access_queue(|view| view.make_urgent_where(pred))
    }

    /// Run `f` with exclusive access to an index-preserving view.
    ///
    /// The lock is held for the whole call. Calling back into this queue, or
    /// into any queue sharing its lock, from `f` deadlocks.
    pub fn access_queue<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut SingleQueueView<'_, K, T>) -> R,
    {
        let mut state = self.state.lock();
        let mut view = SingleQueueView { state: &mut *state };
        let result = f(&mut view);
        self.len.store(state.list.len(), Ordering::Relaxed);
        result
    }

    /// Approximate number of pending entries (not locked)
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Approximate emptiness (not locked)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, T> Default for LockedQueueWithSingle<K, T>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Locked view of a [`LockedQueueWithSingle`].
///
/// Every mutation keeps the key index in step with the list.
pub struct SingleQueueView<'a, K, T> {
    state: &'a mut SingleState<K, T>,
}

impl<K, T> SingleQueueView<'_, K, T>
where
    K: Eq + Hash + Clone,
{
    /// Exact number of pending entries
    pub fn len(&self) -> usize {
        self.state.list.len()
    }

    /// Whether no entries are pending
    pub fn is_empty(&self) -> bool {
        self.state.list.is_empty()
    }

    /// Pending values, front to back
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.state.list.iter().map(|(_, slot)| &slot.value)
    }

    /// Push an unkeyed entry; `urgent` inserts at the front
    pub fn push(&mut self, item: T, urgent: bool) {
        let slot = Slot {
            key: None,
            value: item,
        };
        if urgent {
            self.state.list.push_front(slot);
        } else {
            self.state.list.push_back(slot);
        }
    }

    /// Push `item` as the single pending entry for `key`.
    ///
    /// Returns the value it displaced, if `key` was already pending. The
    /// caller decides where that value is dropped.
    #[must_use = "the displaced value would be dropped under the queue lock"]
    pub fn push_single(&mut self, key: K, item: T, append_if_exists: bool) -> Option<T> {
        let state = &mut *self.state;
        match state.index.get(&key).copied() {
            Some(id) if append_if_exists => {
                let displaced = state.list.remove(id).map(|slot| slot.value);
                let id = state.list.push_back(Slot {
                    key: Some(key.clone()),
                    value: item,
                });
                state.index.insert(key, id);
                displaced
            }
            Some(id) => match state.list.get_mut(id) {
                Some(slot) => Some(std::mem::replace(&mut slot.value, item)),
                None => {
                    tracing::error!("single index points at a vacant node; re-appending");
                    debug_assert!(false, "single index out of sync with list");
                    let id = state.list.push_back(Slot {
                        key: Some(key.clone()),
                        value: item,
                    });
                    state.index.insert(key, id);
                    None
                }
            },
            None => {
                let id = state.list.push_back(Slot {
                    key: Some(key.clone()),
                    value: item,
                });
                state.index.insert(key, id);
                None
            }
        }
    }

    /// Push `item` for `key` at the front.
    ///
    /// If `key` is already pending, that entry moves to the front instead and
    /// `item` is handed back unused.
    #[must_use = "the unused item would be dropped under the queue lock"]
    pub fn push_single_urgent(&mut self, key: K, item: T) -> Option<T> {
        let state = &mut *self.state;
        if let Some(&id) = state.index.get(&key) {
            if state.list.move_to_front(id) {
                return Some(item);
            }
            tracing::error!("single index points at a vacant node; re-inserting");
            debug_assert!(false, "single index out of sync with list");
        }
        let id = state.list.push_front(Slot {
            key: Some(key.clone()),
            value: item,
        });
        state.index.insert(key, id);
        None
    }

    /// Append unless the last pending value equals `item` per `eq`
    pub fn push_single_last_by<F>(&mut self, item: T, eq: F) -> bool
    where
        F: FnOnce(&T, &T) -> bool,
    {
        let last = self.state.list.back().and_then(|id| self.state.list.get(id));
        if last.is_some_and(|slot| eq(&slot.value, &item)) {
            return false;
        }
        self.push(item, false);
        true
    }

    /// Remove and return the front entry
    pub fn pop(&mut self) -> Option<T> {
        self.pop_keyed().map(|(_, value)| value)
    }

    /// Remove and return the front entry with its key, dropping the key from
    /// the index
    pub fn pop_keyed(&mut self) -> Option<(Option<K>, T)> {
        let slot = self.state.list.pop_front()?;
        if let Some(key) = &slot.key {
            if self.state.index.remove(key).is_none() {
                tracing::error!("popped keyed entry missing from single index");
                debug_assert!(false, "single index out of sync with list");
            }
        }
        Some((slot.key, slot.value))
    }

    /// Drain every entry in order
    pub fn pop_all(&mut self) -> Vec<T> {
        self.state.index.clear();
        self.state
            .list
            .take_all()
            .into_iter()
            .map(|slot| slot.value)
            .collect()
    }

    /// Discard every entry. Values are dropped while the lock is held; use
    /// [`pop_all`](Self::pop_all) to drop them elsewhere.
    pub fn clear(&mut self) {
        self.state.index.clear();
        self.state.list.clear();
    }

    /// Whether an entry for `key` is pending
    pub fn contains_key(&self, key: &K) -> bool {
        self.state.index.contains_key(key)
    }

    /// Remove the pending entry for `key`
    pub fn remove_key(&mut self, key: &K) -> Option<T> {
        let id = self.state.index.remove(key)?;
        self.state.list.remove(id).map(|slot| slot.value)
    }

    /// Move the pending entry for `key` to the front
    pub fn make_urgent_key(&mut self, key: &K) -> bool {
        match self.state.index.get(key) {
            Some(&id) => self.state.list.move_to_front(id),
            None => false,
        }
    }

    /// Whether any pending entry matches `pred`
    pub fn contains_where<P>(&self, mut pred: P) -> bool
    where
        P: FnMut(&T) -> bool,
    {
        self.state.list.find(|slot| pred(&slot.value)).is_some()
    }

    /// Remove the first entry matching `pred`, keyed or not
    pub fn remove_where<P>(&mut self, mut pred: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        let id = self.state.list.find(|slot| pred(&slot.value))?;
        let slot = self.state.list.remove(id)?;
        if let Some(key) = &slot.key {
            self.state.index.remove(key);
        }
        Some(slot.value)
    }

    /// Move the first entry matching `pred` to the front
    pub fn make_urgent_where<P>(&mut self, mut pred: P) -> bool
    where
        P: FnMut(&T) -> bool,
    {
        match self.state.list.find(|slot| pred(&slot.value)) {
            Some(id) => self.state.list.move_to_front(id),
            None => false,
        }
    }
}
