//! Thread State
//!
//! Lifecycle state of a dispatcher's worker. Reads are lock-free; every
//! transition happens under a small mutex and wakes anyone waiting on it, so
//! `start`/`stop` block on a condition variable instead of polling.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ThreadState {
    /// No worker; the only state a dispatcher may be dropped in
    Stopped = 0,
    /// `start` was called; the worker has not begun its loop yet
    Starting = 1,
    /// The worker loop is live
    Running = 2,
    /// `stop` was requested; the worker has not exited yet
    ShuttingDown = 3,
}

impl ThreadState {
    /// Get state name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

/// Observable state with blocking waits on transitions
#[derive(Debug)]
pub(crate) struct StateCell {
    value: AtomicU8,
    lock: Mutex<()>,
    changed: Condvar,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            value: AtomicU8::new(ThreadState::Stopped as u8),
            lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn get(&self) -> ThreadState {
        ThreadState::from_u8(self.value.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, next: ThreadState) -> ThreadState {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let prev = ThreadState::from_u8(self.value.swap(next as u8, Ordering::AcqRel));
        if prev != next {
            tracing::debug!(from = prev.name(), to = next.name(), "worker state");
        }
        self.changed.notify_all();
        prev
    }

    /// Block while `pred` holds for the current state.
    ///
    /// Returns the first state for which `pred` is false, or the time spent
    /// waiting if `timeout` elapsed first. `None` waits without bound.
    pub(crate) fn wait_while<P>(&self, pred: P, timeout: Option<Duration>) -> Result<ThreadState, Duration>
    where
        P: Fn(ThreadState) -> bool,
    {
        let started = Instant::now();
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let state = self.get();
            if !pred(state) {
                return Ok(state);
            }
            match timeout {
                Some(limit) => {
                    let waited = started.elapsed();
                    if waited >= limit {
                        return Err(waited);
                    }
                    guard = self
                        .changed
                        .wait_timeout(guard, limit - waited)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                None => {
                    guard = self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}
