//! Tasks
//!
//! Queued units of work and their identities.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::WorkerFailure;

/// Task body. `FnMut` so a worker task can be re-enqueued and run again.
pub type TaskFn = Box<dyn FnMut() + Send + 'static>;

/// Identity of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskId {
    /// Assigned from the per-direction counter
    Auto(u64),
    /// Supplied by the caller of a `*_single` call
    Keyed(u64),
}

impl TaskId {
    pub fn is_keyed(&self) -> bool {
        matches!(self, Self::Keyed(_))
    }

    pub fn value(&self) -> u64 {
        match self {
            Self::Auto(v) | Self::Keyed(v) => *v,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto(v) => write!(f, "auto#{}", v),
            Self::Keyed(v) => write!(f, "keyed#{}", v),
        }
    }
}

/// Monotonic source of [`TaskId::Auto`] ids.
///
/// Starts at 1 and wraps from `u64::MAX` back to 1.
#[derive(Debug)]
pub(crate) struct IdCounter {
    next: AtomicU64,
}

impl IdCounter {
    pub(crate) fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }

    pub(crate) fn next(&self) -> TaskId {
        let advance = |v: u64| Some(if v == u64::MAX { 1 } else { v + 1 });
        let id = match self.next.fetch_update(Ordering::Relaxed, Ordering::Relaxed, advance) {
            Ok(prev) | Err(prev) => prev,
        };
        TaskId::Auto(id)
    }
}

/// What a queued task carries
pub(crate) enum TaskBody {
    /// A closure to execute
    Call(TaskFn),
    /// A worker failure travelling to the main thread
    Failure(WorkerFailure),
}

/// Queued unit of work
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) body: TaskBody,
}

impl Task {
    pub(crate) fn call(id: TaskId, body: TaskFn) -> Self {
        Self {
            id,
            body: TaskBody::Call(body),
        }
    }

    pub(crate) fn failure(id: TaskId, failure: WorkerFailure) -> Self {
        Self {
            id,
            body: TaskBody::Failure(failure),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.body {
            TaskBody::Call(_) => "call",
            TaskBody::Failure(_) => "failure",
        };
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_monotonic() {
        let counter = IdCounter::new();
        assert_eq!(counter.next(), TaskId::Auto(1));
        assert_eq!(counter.next(), TaskId::Auto(2));
        assert_eq!(counter.next(), TaskId::Auto(3));
    }

    #[test]
    fn test_counter_wraps_past_zero() {
        let counter = IdCounter::starting_at(u64::MAX - 1);
        assert_eq!(counter.next(), TaskId::Auto(u64::MAX - 1));
        assert_eq!(counter.next(), TaskId::Auto(u64::MAX));
        assert_eq!(counter.next(), TaskId::Auto(1));
    }

    #[test]
    fn test_keyed_and_auto_never_equal() {
        assert_ne!(TaskId::Auto(5), TaskId::Keyed(5));
        assert_eq!(TaskId::Auto(5).value(), TaskId::Keyed(5).value());
        assert!(TaskId::Keyed(5).is_keyed());
    }

    #[test]
    fn test_display() {
        assert_eq!(TaskId::Auto(3).to_string(), "auto#3");
        assert_eq!(TaskId::Keyed(9).to_string(), "keyed#9");
    }
}
