//! Dispatcher shared state
//!
//! Everything both threads touch: the two queues, the lifecycle state, the
//! worker's wake signal, per-side execution slots and cached thread ids.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tandem_queue::{LockedQueueWithSingle, QueueLock};

use crate::config::DispatcherConfig;
use crate::state::StateCell;
use crate::task::{IdCounter, Task, TaskId};

pub(crate) type TaskQueue = LockedQueueWithSingle<TaskId, Task>;

/// Which logical thread a call comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Main,
    Worker,
}

pub(crate) struct Shared {
    pub(crate) config: DispatcherConfig,

    /// Calls destined for the worker
    pub(crate) worker_queue: TaskQueue,
    /// Calls destined for the main thread
    pub(crate) main_queue: TaskQueue,
    pub(crate) worker_ids: IdCounter,
    pub(crate) main_ids: IdCounter,

    pub(crate) state: StateCell,
    pub(crate) signal: WakeSignal,
    pub(crate) worker_exec: ExecSlot,
    pub(crate) main_exec: ExecSlot,
    pub(crate) threads: ThreadIds,

    pub(crate) paused: AtomicBool,
    pub(crate) stop_requested: AtomicBool,
    pub(crate) instant_stop: AtomicBool,
    /// A worker-initiated stop is already waiting in the main queue
    pub(crate) stop_posted: AtomicBool,
    /// Set by `re_enqueue` inside the running worker task
    pub(crate) re_enqueue: AtomicBool,

    pub(crate) join: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn new(config: DispatcherConfig) -> Self {
        let (worker_queue, main_queue) = if config.shared_queue_lock {
            let lock = QueueLock::new();
            (TaskQueue::with_lock(lock.clone()), TaskQueue::with_lock(lock))
        } else {
            (TaskQueue::new(), TaskQueue::new())
        };

        Self {
            config,
            worker_queue,
            main_queue,
            worker_ids: IdCounter::new(),
            main_ids: IdCounter::new(),
            state: StateCell::new(),
            signal: WakeSignal::new(),
            worker_exec: ExecSlot::new(),
            main_exec: ExecSlot::new(),
            threads: ThreadIds::new(thread::current().id()),
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            instant_stop: AtomicBool::new(false),
            stop_posted: AtomicBool::new(false),
            re_enqueue: AtomicBool::new(false),
            join: Mutex::new(None),
        }
    }

    pub(crate) fn queue(&self, side: Side) -> &TaskQueue {
        match side {
            Side::Main => &self.main_queue,
            Side::Worker => &self.worker_queue,
        }
    }

    pub(crate) fn exec(&self, side: Side) -> &ExecSlot {
        match side {
            Side::Main => &self.main_exec,
            Side::Worker => &self.worker_exec,
        }
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Whether a pause currently holds the worker back. A requested stop
    /// overrides it so the queue still drains.
    pub(crate) fn pause_holds(&self) -> bool {
        self.is_paused() && !self.stop_requested.load(Ordering::Acquire)
    }

    /// The worker's sleep condition, minus the wake counter
    pub(crate) fn worker_may_sleep(&self) -> bool {
        (self.worker_queue.is_empty() || self.is_paused())
            && !self.stop_requested.load(Ordering::Acquire)
    }
}

// ============================================================================
// Thread identity
// ============================================================================

/// Cached ids of the main and worker threads, used only for assertions and
/// for routing a worker-initiated stop.
#[derive(Debug)]
pub(crate) struct ThreadIds {
    main: ThreadId,
    worker: Mutex<Option<ThreadId>>,
}

impl ThreadIds {
    fn new(main: ThreadId) -> Self {
        Self {
            main,
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn main(&self) -> ThreadId {
        self.main
    }

    pub(crate) fn worker(&self) -> Option<ThreadId> {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_worker(&self, id: Option<ThreadId>) {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }
}

// ============================================================================
// Execution slots
// ============================================================================

/// Id of the task currently executing on one side
#[derive(Debug)]
pub(crate) struct ExecSlot {
    current: Mutex<Option<TaskId>>,
    finished: Condvar,
}

impl ExecSlot {
    fn new() -> Self {
        Self {
            current: Mutex::new(None),
            finished: Condvar::new(),
        }
    }

    pub(crate) fn current(&self) -> Option<TaskId> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `id` as executing until the guard drops.
    ///
    /// Nested entries (direct execution) restore the outer id on exit.
    pub(crate) fn enter(&self, id: TaskId) -> ExecGuard<'_> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let outer = current.replace(id);
        ExecGuard { slot: self, outer }
    }

    /// Block until no task executes on this side. Returns false on timeout.
    pub(crate) fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let started = Instant::now();
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        while current.is_some() {
            current = match timeout {
                Some(limit) => {
                    let waited = started.elapsed();
                    if waited >= limit {
                        return false;
                    }
                    self.finished
                        .wait_timeout(current, limit - waited)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.finished.wait(current).unwrap_or_else(PoisonError::into_inner),
            };
        }
        true
    }
}

pub(crate) struct ExecGuard<'a> {
    slot: &'a ExecSlot,
    outer: Option<TaskId>,
}

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        let mut current = self.slot.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = self.outer;
        if current.is_none() {
            self.slot.finished.notify_all();
        }
    }
}

// ============================================================================
// Wake signal
// ============================================================================

#[derive(Debug, Default)]
struct WakeState {
    /// Saturating count of wake requests since the worker last looked
    pending: u32,
    /// The worker is parked at its sleep condition
    idle: bool,
}

/// Wake counter and idle flag shared by the worker and its callers
#[derive(Debug)]
pub(crate) struct WakeSignal {
    state: Mutex<WakeState>,
    wake: Condvar,
    idle: Condvar,
}

impl WakeSignal {
    fn new() -> Self {
        Self {
            state: Mutex::new(WakeState::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    pub(crate) fn notify(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending = state.pending.saturating_add(1);
        self.wake.notify_one();
    }

    /// Worker side: collapse pending wakes and park while `may_sleep` holds.
    ///
    /// Each wait is bounded by `poll` so a lost notify costs one poll
    /// interval at most. Consumes the pending wake before returning.
    pub(crate) fn park<F>(&self, may_sleep: F, poll: Duration)
    where
        F: Fn() -> bool,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending = state.pending.min(1);

        if state.pending == 0 && may_sleep() {
            state.idle = true;
            self.idle.notify_all();
            while state.pending == 0 && may_sleep() {
                state = self
                    .wake
                    .wait_timeout(state, poll)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }

        state.pending = 0;
        state.idle = false;
    }

    /// Caller side: block until the worker is parked with nothing pending,
    /// or `gone` reports that it will never park again.
    pub(crate) fn wait_parked<F>(&self, gone: F, poll: Duration)
    where
        F: Fn() -> bool,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !(state.idle && state.pending == 0) && !gone() {
            state = self
                .idle
                .wait_timeout(state, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Release every caller blocked in `wait_parked`
    pub(crate) fn release_waiters(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.idle = false;
        self.idle.notify_all();
    }

    pub(crate) fn is_parked(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).idle
    }
}
