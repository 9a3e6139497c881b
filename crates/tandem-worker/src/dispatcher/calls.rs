//! Cross-thread calls and queue queries

use std::sync::atomic::Ordering;

use super::DispatcherHandle;
use super::shared::Side;
use crate::check::debug_check;
use crate::task::{Task, TaskFn, TaskId};

/// How a call lands in its queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Back,
    Front,
    /// Replace the pending instance of the key in place
    Single,
    /// Move the pending instance of the key to the back
    SingleLast,
}

impl DispatcherHandle {
    /// Queue `f` for the worker. `urgent` puts it ahead of everything pending.
    pub fn call_worker<F>(&self, f: F, urgent: bool) -> TaskId
    where
        F: FnMut() + Send + 'static,
    {
        let placement = if urgent { Placement::Front } else { Placement::Back };
        let id = self.shared.worker_ids.next();
        self.enqueue(Side::Worker, id, Box::new(f), placement)
    }

    /// Queue `f` as the single pending worker call for `key`.
    ///
    /// A pending call with the same key is replaced and keeps its position.
    pub fn call_worker_single<F>(&self, key: u64, f: F) -> TaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.enqueue(Side::Worker, TaskId::Keyed(key), Box::new(f), Placement::Single)
    }

    /// Queue `f` as the single pending worker call for `key`, moving it
    /// behind everything else pending
    pub fn call_worker_single_last<F>(&self, key: u64, f: F) -> TaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.enqueue(Side::Worker, TaskId::Keyed(key), Box::new(f), Placement::SingleLast)
    }

    /// Queue `f` for the main thread. Never blocks.
    pub fn call_main<F>(&self, f: F) -> TaskId
    where
        F: FnMut() + Send + 'static,
    {
        let id = self.shared.main_ids.next();
        self.enqueue(Side::Main, id, Box::new(f), Placement::Back)
    }

    /// Queue `f` as the single pending main-thread call for `key`.
    ///
    /// A pending call with the same key is replaced and keeps its position.
    /// Typical for results the main thread only needs the latest of.
    pub fn call_main_single<F>(&self, key: u64, f: F) -> TaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.enqueue(Side::Main, TaskId::Keyed(key), Box::new(f), Placement::Single)
    }

    /// Queue `f` as the single pending main-thread call for `key`, moving it
    /// behind everything else pending
    pub fn call_main_single_last<F>(&self, key: u64, f: F) -> TaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.enqueue(Side::Main, TaskId::Keyed(key), Box::new(f), Placement::SingleLast)
    }

    fn enqueue(&self, side: Side, id: TaskId, body: TaskFn, placement: Placement) -> TaskId {
        let shared = &self.shared;
        let task = Task::call(id, body);

        if self.runs_inline(side) {
            tracing::trace!(task = %id, ?side, "direct call");
            self.run_inline(side, task);
            return id;
        }

        let queue = shared.queue(side);
        match placement {
            Placement::Back => queue.push(task, false),
            Placement::Front => queue.push(task, true),
            Placement::Single => {
                if queue.push_single(id, task, false) {
                    tracing::trace!(task = %id, ?side, "replaced pending call");
                }
            }
            Placement::SingleLast => {
                if queue.push_single(id, task, true) {
                    tracing::trace!(task = %id, ?side, "moved pending call to the back");
                }
            }
        }
        tracing::trace!(task = %id, ?side, ?placement, "queued");

        if side == Side::Worker && shared.config.threaded && !shared.is_paused() {
            shared.signal.notify();
        }
        id
    }

    /// Direct execution: non-threaded, enabled, and already on the target context
    fn runs_inline(&self, target: Side) -> bool {
        let config = &self.shared.config;
        if config.threaded || !config.direct_execution || !self.is_in_main() {
            return false;
        }
        let current = if self.is_in_worker() { Side::Worker } else { Side::Main };
        current == target
    }

    /// Mark the running worker task to be queued again at the front once it
    /// returns
    pub fn re_enqueue(&self) {
        let shared = &self.shared;
        let in_task = self.is_in_worker() && shared.worker_exec.current().is_some();
        if debug_check(in_task, "re_enqueue() called outside a worker task") {
            shared.re_enqueue.store(true, Ordering::Release);
        }
    }

    /// Move a pending worker task to the front. False if it is not pending.
    pub fn make_worker_task_urgent(&self, id: TaskId) -> bool {
        let queue = &self.shared.worker_queue;
        match id {
            TaskId::Keyed(_) => queue.make_urgent_key(&id),
            TaskId::Auto(_) => queue.make_urgent_where(|task| task.id == id),
        }
    }

    /// Drop a pending worker task. False if it already started or finished.
    pub fn remove_worker_task(&self, id: TaskId) -> bool {
        let queue = &self.shared.worker_queue;
        let removed = match id {
            TaskId::Keyed(_) => queue.remove_key(&id),
            TaskId::Auto(_) => queue.remove_where(|task| task.id == id),
        };
        removed.is_some()
    }

    /// Whether `id` is still waiting in the worker queue
    pub fn has_worker_task(&self, id: TaskId) -> bool {
        let queue = &self.shared.worker_queue;
        match id {
            TaskId::Keyed(_) => queue.contains_key(&id),
            TaskId::Auto(_) => queue.contains_where(|task| task.id == id),
        }
    }

    /// Whether `id` is still waiting in the main queue
    pub fn has_main_task(&self, id: TaskId) -> bool {
        let queue = &self.shared.main_queue;
        match id {
            TaskId::Keyed(_) => queue.contains_key(&id),
            TaskId::Auto(_) => queue.contains_where(|task| task.id == id),
        }
    }

    /// Whether `id` has not started yet on either side.
    ///
    /// Worker and main ids come from separate counters, so an auto id may
    /// match a task in either queue.
    pub fn still_enqueued(&self, id: TaskId) -> bool {
        self.has_worker_task(id) || self.has_main_task(id)
    }

    /// Id of the worker task being executed by the caller, if any
    pub fn current_worker_task_id(&self) -> Option<TaskId> {
        if self.is_in_worker() {
            self.shared.worker_exec.current()
        } else {
            None
        }
    }

    /// Id of the main task being executed by the caller, if any
    pub fn current_main_task_id(&self) -> Option<TaskId> {
        if self.is_in_main() && !self.is_in_worker() {
            self.shared.main_exec.current()
        } else {
            None
        }
    }
}
