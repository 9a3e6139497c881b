//! Worker loop and task execution
//!
//! The threaded worker parks on the wake signal, then pulls one task at a
//! time until its queue is empty, it is paused, or a stop arrives. The
//! non-threaded passes drain a whole batch per `pump_main`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::thread;

use tandem_queue::SingleQueueView;

use super::shared::{Shared, Side};
use super::{DispatcherHandle, StartupFn};
use crate::check::debug_check;
use crate::error::WorkerFailure;
use crate::state::ThreadState;
use crate::task::{Task, TaskBody, TaskId};

/// Worker thread entry point
pub(super) fn run(handle: DispatcherHandle, on_startup: Option<StartupFn>) {
    let shared = &*handle.shared;
    let span = tracing::info_span!("worker", name = %shared.config.thread_name);
    let _enter = span.enter();

    shared.threads.set_worker(Some(thread::current().id()));
    shared.config.priority.apply_to_current();
    let _exit = ExitGuard {
        shared,
        only_on_panic: false,
    };

    if let Some(on_startup) = on_startup {
        on_startup(&handle);
    }
    shared.state.set(ThreadState::Running);
    shared.worker_loop();
    tracing::debug!("worker loop finished");
}

/// Reports the worker as stopped when it exits
struct ExitGuard<'a> {
    shared: &'a Shared,
    /// Non-threaded passes only stop the dispatcher when a task panics
    only_on_panic: bool,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let panicked = thread::panicking();
        if self.only_on_panic && !panicked {
            return;
        }
        if panicked {
            tracing::error!("worker terminated by a panicking task");
        }
        if !self.only_on_panic {
            self.shared.threads.set_worker(None);
        }
        self.shared.state.set(ThreadState::Stopped);
        self.shared.signal.release_waiters();
    }
}

impl Shared {
    fn worker_loop(&self) {
        let poll = self.config.idle_poll;
        loop {
            self.signal.park(|| self.worker_may_sleep(), poll);
            if self.instant_stop.load(Ordering::Acquire) {
                return;
            }

            while !self.pause_holds() {
                let Some(task) = self.worker_queue.pop() else {
                    break;
                };
                if let Some(task) = self.run_worker_task(task) {
                    let displaced = self.worker_queue.access_queue(|view| push_front(view, task));
                    drop(displaced);
                }
                if self.instant_stop.load(Ordering::Acquire) {
                    return;
                }
            }

            if self.stop_requested.load(Ordering::Acquire) && self.worker_queue.is_empty() {
                return;
            }
        }
    }

    /// Execute one worker task. Returns it back if it asked to run again.
    fn run_worker_task(&self, mut task: Task) -> Option<Task> {
        let TaskBody::Call(body) = &mut task.body else {
            debug_check(false, "failure record found in the worker queue");
            return None;
        };

        let outer = self.re_enqueue.swap(false, Ordering::AcqRel);
        let outcome = {
            let _exec = self.worker_exec.enter(task.id);
            tracing::trace!(task = %task.id, "worker task");
            if self.config.relay_worker_panics {
                panic::catch_unwind(AssertUnwindSafe(|| body()))
            } else {
                body();
                Ok(())
            }
        };
        let again = self.re_enqueue.swap(outer, Ordering::AcqRel);

        match outcome {
            Ok(()) => again.then_some(task),
            Err(payload) => {
                self.relay_failure(task.id, payload);
                None
            }
        }
    }

    /// Hand a captured panic to the main queue, or let it kill the worker
    fn relay_failure(&self, task: TaskId, payload: Box<dyn Any + Send>) {
        match WorkerFailure::from_panic(task, payload) {
            Ok(failure) => {
                tracing::error!(%task, error = %failure, "worker task failed; relaying to main");
                let id = self.main_ids.next();
                self.main_queue.push(Task::failure(id, failure), false);
            }
            Err(payload) => {
                tracing::error!(%task, "worker task panicked with an unsupported payload");
                panic::resume_unwind(payload);
            }
        }
    }

    fn run_main_task(&self, task: Task) -> Result<(), WorkerFailure> {
        match task.body {
            TaskBody::Call(mut body) => {
                let _exec = self.main_exec.enter(task.id);
                tracing::trace!(task = %task.id, "main task");
                body();
                Ok(())
            }
            TaskBody::Failure(failure) => Err(failure),
        }
    }
}

/// Put `task` at the front of its queue, honouring its key.
///
/// Returns the task that lost to a newer pending call with the same key; the
/// caller drops it once the queue lock is released.
#[must_use]
fn push_front(view: &mut SingleQueueView<'_, TaskId, Task>, task: Task) -> Option<Task> {
    match task.id {
        TaskId::Keyed(_) => view.push_single_urgent(task.id, task),
        TaskId::Auto(_) => {
            view.push(task, true);
            None
        }
    }
}

/// Put `tasks` back at the front of `queue`, keeping their order
fn requeue_front(shared: &Shared, side: Side, tasks: Vec<Task>) {
    if tasks.is_empty() {
        return;
    }
    let displaced: Vec<Task> = shared.queue(side).access_queue(|view| {
        tasks.into_iter().rev().filter_map(|task| push_front(view, task)).collect()
    });
    drop(displaced);
}

impl DispatcherHandle {
    /// Execute everything currently in the main queue
    pub(super) fn main_pass(&self) -> Result<usize, WorkerFailure> {
        let shared = &*self.shared;
        let mut batch = shared.main_queue.pop_all().into_iter();
        let mut executed = 0;

        while let Some(task) = batch.next() {
            if let Err(failure) = shared.run_main_task(task) {
                requeue_front(shared, Side::Main, batch.collect());
                return Err(failure);
            }
            executed += 1;
        }
        Ok(executed)
    }

    /// Non-threaded: execute everything currently in the worker queue.
    ///
    /// A task that re-enqueues itself goes back to the front and ends the
    /// pass; so does a pause issued from inside a task, unless a stop is
    /// draining the queue.
    pub(super) fn worker_pass(&self) -> usize {
        let shared = &*self.shared;
        if shared.pause_holds() {
            return 0;
        }

        let _exit = ExitGuard {
            shared,
            only_on_panic: true,
        };
        let mut batch = shared.worker_queue.pop_all().into_iter();
        let mut executed = 0;

        while let Some(task) = batch.next() {
            executed += 1;
            let again = shared.run_worker_task(task);
            if again.is_some() || shared.pause_holds() {
                let mut rest: Vec<Task> = again.into_iter().collect();
                rest.extend(batch.by_ref());
                requeue_front(shared, Side::Worker, rest);
                break;
            }
        }
        executed
    }

    /// Direct execution of a call on the caller's own context
    pub(super) fn run_inline(&self, side: Side, task: Task) {
        let shared = &*self.shared;
        match side {
            Side::Worker => {
                if let Some(task) = shared.run_worker_task(task) {
                    let displaced = shared.worker_queue.access_queue(|view| push_front(view, task));
                    drop(displaced);
                }
            }
            Side::Main => {
                if let Err(failure) = shared.run_main_task(task) {
                    tracing::error!(error = %failure, "failure record run inline");
                }
            }
        }
    }
}
