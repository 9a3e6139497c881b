//! Queue Locks
//!
//! Injectable critical section for locked queues. A queue either owns a
//! private mutex or is built around a caller-owned [`QueueLock`] that other
//! queues share, so that operations on all of them are mutually exclusive.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Caller-owned lock that several queues can share.
///
/// Cloning a `QueueLock` yields another handle to the same critical section.
#[derive(Debug, Clone, Default)]
pub struct QueueLock {
    inner: Arc<Mutex<()>>,
}

impl QueueLock {
    /// Create a new, unshared lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether both handles guard the same critical section
    pub fn is_shared_with(&self, other: &QueueLock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Queue state behind an optional shared lock and a private mutex.
///
/// The shared lock is always taken before the private one. The private mutex
/// is never exposed, so the acquisition order cannot be inverted.
#[derive(Debug)]
pub(crate) struct Guarded<S> {
    shared: Option<QueueLock>,
    state: Mutex<S>,
}

impl<S> Guarded<S> {
    pub(crate) fn new(state: S, shared: Option<QueueLock>) -> Self {
        Self {
            shared,
            state: Mutex::new(state),
        }
    }

    pub(crate) fn shared_lock(&self) -> Option<&QueueLock> {
        self.shared.as_ref()
    }

    pub(crate) fn lock(&self) -> GuardedRef<'_, S> {
        let outer = self.shared.as_ref().map(QueueLock::acquire);
        let inner = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        GuardedRef {
            inner,
            _outer: outer,
        }
    }
}

/// Exclusive access to guarded queue state.
///
/// Fields drop in declaration order, releasing the private mutex before the
/// shared one.
pub(crate) struct GuardedRef<'a, S> {
    inner: MutexGuard<'a, S>,
    _outer: Option<MutexGuard<'a, ()>>,
}

impl<S> Deref for GuardedRef<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner
    }
}

impl<S> DerefMut for GuardedRef<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_clones_share_lock() {
        let a = QueueLock::new();
        let b = a.clone();
        let c = QueueLock::new();

        assert!(a.is_shared_with(&b));
        assert!(!a.is_shared_with(&c));
    }

    #[test]
    fn test_shared_lock_excludes_other_state() {
        let lock = QueueLock::new();
        let first = Arc::new(Guarded::new(0u32, Some(lock.clone())));
        let second = Arc::new(Guarded::new(0u32, Some(lock)));
        let entered = Arc::new(AtomicBool::new(false));

        let held = first.lock();

        let handle = {
            let second = Arc::clone(&second);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let mut state = second.lock();
                *state += 1;
                entered.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));

        drop(held);
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert_eq!(*second.lock(), 1);
    }
}
