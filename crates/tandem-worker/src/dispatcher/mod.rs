//! Dispatcher
//!
//! One dedicated worker thread exchanging closures with a main thread.
//!
//! The main thread owns a [`Dispatcher`] and drives [`DispatcherHandle::pump_main`]
//! once per tick. Code on either side enqueues closures for the other side
//! through a cloned [`DispatcherHandle`]. In non-threaded mode no thread is
//! spawned and the worker queue is drained inside `pump_main`.

mod calls;
mod shared;
mod worker;

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::thread;

use crate::check::debug_check;
use crate::config::{ConfigError, DispatcherConfig};
use crate::error::{DispatchError, WorkerFailure, panic_message};
use crate::state::ThreadState;

use shared::{Shared, Side};

/// Callback run on the worker context before it reports `Running`
type StartupFn = Box<dyn FnOnce(&DispatcherHandle) + Send + 'static>;

/// Clonable access to a dispatcher, usable from either thread.
///
/// Handles do not keep the worker alive: dropping the owning [`Dispatcher`]
/// stops it regardless of outstanding handles.
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

/// Owning guard for a dispatcher.
///
/// Dereferences to [`DispatcherHandle`]. Dropping it performs a normal stop and
/// discards whatever is still queued.
pub struct Dispatcher {
    handle: DispatcherHandle,
}

impl Dispatcher {
    /// Create a stopped dispatcher owned by the calling thread
    pub fn new(config: DispatcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            handle: DispatcherHandle {
                shared: Arc::new(Shared::new(config)),
            },
        })
    }

    /// Create a threaded dispatcher with default settings
    pub fn with_defaults() -> Self {
        Self {
            handle: DispatcherHandle {
                shared: Arc::new(Shared::new(DispatcherConfig::default())),
            },
        }
    }

    /// A clonable handle for task bodies and other owners
    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }
}

impl Deref for Dispatcher {
    type Target = DispatcherHandle;

    fn deref(&self) -> &DispatcherHandle {
        &self.handle
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.handle.is_stopped() || self.handle.has_unreaped_worker() {
            if let Err(err) = self.handle.stop(false) {
                tracing::warn!(error = %err, "dispatcher dropped with a failed stop");
            }
        }
        self.handle.shared.worker_queue.clear();
        self.handle.shared.main_queue.clear();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt(f)
    }
}

impl fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state())
            .field("threaded", &self.is_threaded())
            .field("paused", &self.is_paused())
            .field("pending_worker_tasks", &self.pending_worker_tasks())
            .field("pending_main_tasks", &self.pending_main_tasks())
            .finish()
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl DispatcherHandle {
    /// Start the worker.
    ///
    /// No-op while already starting or running. A dispatcher that is still
    /// shutting down is waited out first. Both queues are cleared before the
    /// worker starts. With `wait`, blocks until the worker reports `Running`.
    pub fn start(&self, wait: bool) -> Result<(), DispatchError> {
        self.start_inner(wait, None)
    }

    /// Start the worker and run `on_startup` on the worker context before it
    /// reports `Running`
    pub fn start_with<F>(&self, wait: bool, on_startup: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&DispatcherHandle) + Send + 'static,
    {
        self.start_inner(wait, Some(Box::new(on_startup)))
    }

    fn start_inner(&self, wait: bool, on_startup: Option<StartupFn>) -> Result<(), DispatchError> {
        let shared = &self.shared;
        debug_check(self.is_in_main(), "start() must be called from the main thread");

        match shared.state.get() {
            ThreadState::Starting | ThreadState::Running => {
                return if wait { self.wait_started() } else { Ok(()) };
            }
            ThreadState::ShuttingDown => {
                self.wait_stopped()?;
            }
            ThreadState::Stopped => {}
        }

        if let Err(err) = self.reap_worker() {
            tracing::warn!(error = %err, "previous worker ended abnormally");
        }

        shared.worker_queue.clear();
        shared.main_queue.clear();
        shared.paused.store(false, Ordering::Release);
        shared.stop_requested.store(false, Ordering::Release);
        shared.instant_stop.store(false, Ordering::Release);
        shared.stop_posted.store(false, Ordering::Release);
        shared.re_enqueue.store(false, Ordering::Release);
        shared.state.set(ThreadState::Starting);

        if !shared.config.threaded {
            if let Some(on_startup) = on_startup {
                on_startup(self);
            }
            shared.state.set(ThreadState::Running);
            return Ok(());
        }

        let handle = self.clone();
        let spawned = thread::Builder::new()
            .name(shared.config.thread_name.clone())
            .spawn(move || worker::run(handle, on_startup));

        match spawned {
            Ok(join) => {
                *shared.join.lock().unwrap_or_else(PoisonError::into_inner) = Some(join);
                tracing::debug!(name = %shared.config.thread_name, "worker thread spawned");
            }
            Err(err) => {
                shared.state.set(ThreadState::Stopped);
                return Err(DispatchError::Spawn(err));
            }
        }

        if wait { self.wait_started() } else { Ok(()) }
    }

    /// Stop the worker.
    ///
    /// A normal stop lets the worker drain its queue first; a pause issued
    /// while it drains is ignored. An `instant` stop abandons whatever is
    /// still queued once the in-flight task returns. Blocks until the worker
    /// thread has exited and been joined.
    ///
    /// Called from the worker thread itself, the stop is posted to the main
    /// queue and carried out by the next `pump_main`.
    pub fn stop(&self, instant: bool) -> Result<(), DispatchError> {
        let shared = &self.shared;

        if shared.config.threaded && self.is_in_worker() {
            if !shared.stop_posted.swap(true, Ordering::AcqRel) {
                let weak = Arc::downgrade(&self.shared);
                self.call_main(move || {
                    let Some(shared) = weak.upgrade() else { return };
                    if let Err(err) = (DispatcherHandle { shared }).stop(instant) {
                        tracing::warn!(error = %err, "deferred stop failed");
                    }
                });
                tracing::debug!(instant, "stop requested from the worker; deferred to main");
            }
            return Ok(());
        }

        if shared.state.get() == ThreadState::Starting {
            self.wait_started()?;
        }
        if shared.state.get() == ThreadState::Stopped {
            return self.reap_worker();
        }

        shared.state.set(ThreadState::ShuttingDown);

        if !shared.config.threaded {
            shared.stop_requested.store(true, Ordering::Release);
            shared.paused.store(false, Ordering::Release);
            if !instant {
                self.worker_pass();
            }
            shared.state.set(ThreadState::Stopped);
            return Ok(());
        }

        // Stop flags go first so a worker leaving a pause sees them
        if instant {
            shared.instant_stop.store(true, Ordering::Release);
        }
        shared.stop_requested.store(true, Ordering::Release);
        shared.paused.store(false, Ordering::Release);
        shared.signal.notify();

        self.wait_stopped()?;
        self.reap_worker()
    }

    /// Stop the worker from pulling further tasks.
    ///
    /// The task currently executing is not interrupted. With `wait`, blocks
    /// until the worker has parked. Waiting from the worker itself would never
    /// return and is refused.
    pub fn pause(&self, wait: bool) {
        let shared = &self.shared;
        shared.paused.store(true, Ordering::Release);
        tracing::debug!("worker paused");

        if !wait || !shared.config.threaded {
            return;
        }
        if !debug_check(!self.is_in_worker(), "pause(wait=true) called from the worker thread") {
            return;
        }
        self.wait_parked();
    }

    /// Let the worker pull tasks again
    pub fn resume(&self) {
        let shared = &self.shared;
        if shared.paused.swap(false, Ordering::AcqRel) {
            tracing::debug!("worker resumed");
        }
        if shared.config.threaded {
            shared.signal.notify();
        }
    }

    /// Wake the worker. With `wait`, block until it has drained to its
    /// sleep condition. No-op in non-threaded mode.
    pub fn wake_up(&self, wait: bool) {
        let shared = &self.shared;
        if !shared.config.threaded {
            return;
        }
        shared.signal.notify();
        if wait && debug_check(!self.is_in_worker(), "wake_up(wait=true) called from the worker thread") {
            self.wait_parked();
        }
    }

    /// Block until the worker has parked, without waking it.
    ///
    /// Returns at once in non-threaded mode or when no worker is running.
    pub fn wait_for_worker(&self) {
        if !self.shared.config.threaded {
            return;
        }
        if debug_check(!self.is_in_worker(), "wait_for_worker() called from the worker thread") {
            self.wait_parked();
        }
    }

    /// Drain both queues.
    ///
    /// The other side's in-flight task, if any, is allowed to finish first,
    /// and both queues are cleared again afterwards so continuations it posts
    /// to either side are discarded too.
    pub fn clear(&self) {
        let shared = &self.shared;
        let own = if self.is_in_worker() { Side::Worker } else { Side::Main };
        let other = match own {
            Side::Main => Side::Worker,
            Side::Worker => Side::Main,
        };

        shared.queue(own).clear();
        if !shared.exec(other).wait_idle(shared.config.transition_timeout) {
            tracing::warn!(side = ?other, "clear() timed out waiting for an in-flight task");
        }
        shared.queue(other).clear();
        shared.queue(own).clear();
    }

    /// Run everything queued for the main thread.
    ///
    /// In non-threaded mode this also runs one worker pass followed by a
    /// second main pass, so continuations posted by worker tasks run in the
    /// same tick. Returns the number of tasks executed, or the first worker
    /// failure relayed to the main queue. Tasks behind a failure stay queued
    /// for the next call.
    pub fn pump_main(&self) -> Result<usize, WorkerFailure> {
        debug_check(self.is_in_main(), "pump_main() must be called from the main thread");

        let mut executed = self.main_pass()?;
        if !self.shared.config.threaded && self.shared.state.get() == ThreadState::Running {
            executed += self.worker_pass();
            executed += self.main_pass()?;
        }
        Ok(executed)
    }

    fn wait_started(&self) -> Result<(), DispatchError> {
        let shared = &self.shared;
        let state = shared
            .state
            .wait_while(|s| s == ThreadState::Starting, shared.config.transition_timeout)
            .map_err(|waited| DispatchError::TransitionTimeout {
                from: ThreadState::Starting,
                target: ThreadState::Running,
                waited,
            })?;

        // Died during startup
        if state == ThreadState::Stopped {
            return self.reap_worker();
        }
        Ok(())
    }

    fn wait_stopped(&self) -> Result<(), DispatchError> {
        let shared = &self.shared;
        shared
            .state
            .wait_while(|s| s != ThreadState::Stopped, shared.config.transition_timeout)
            .map(drop)
            .map_err(|waited| {
                tracing::warn!(?waited, "worker did not stop in time");
                DispatchError::TransitionTimeout {
                    from: ThreadState::ShuttingDown,
                    target: ThreadState::Stopped,
                    waited,
                }
            })
    }

    fn wait_parked(&self) {
        let shared = &self.shared;
        shared
            .signal
            .wait_parked(|| shared.state.get() == ThreadState::Stopped, shared.config.idle_poll);
    }

    fn has_unreaped_worker(&self) -> bool {
        self.shared.join.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Join an exited worker thread, reporting how it ended
    fn reap_worker(&self) -> Result<(), DispatchError> {
        let join = self.shared.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(join) = join else {
            return Ok(());
        };

        join.join()
            .map_err(|payload| DispatchError::WorkerPanicked(panic_message(payload.as_ref())))?;
        tracing::debug!("worker thread joined");
        Ok(())
    }
}

// ============================================================================
// Status
// ============================================================================

impl DispatcherHandle {
    pub fn state(&self) -> ThreadState {
        self.shared.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ThreadState::Running
    }

    pub fn is_starting(&self) -> bool {
        self.state() == ThreadState::Starting
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ThreadState::Stopped
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state() == ThreadState::ShuttingDown
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Whether the worker is parked at its sleep condition
    pub fn is_idle(&self) -> bool {
        if self.shared.config.threaded {
            self.shared.signal.is_parked()
        } else {
            self.shared.worker_exec.current().is_none()
        }
    }

    pub fn is_threaded(&self) -> bool {
        self.shared.config.threaded
    }

    /// The configuration this dispatcher was built with
    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Whether the caller runs on the thread that created the dispatcher
    pub fn is_in_main(&self) -> bool {
        thread::current().id() == self.shared.threads.main()
    }

    /// Whether the caller runs on the worker context.
    ///
    /// In non-threaded mode this holds while a worker task executes.
    pub fn is_in_worker(&self) -> bool {
        if self.shared.config.threaded {
            self.shared.threads.worker() == Some(thread::current().id())
        } else {
            self.is_in_main() && self.shared.worker_exec.current().is_some()
        }
    }

    /// Approximate worker queue length (not locked)
    pub fn pending_worker_tasks(&self) -> usize {
        self.shared.worker_queue.len()
    }

    /// Approximate main queue length (not locked)
    pub fn pending_main_tasks(&self) -> usize {
        self.shared.main_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn threaded() -> Dispatcher {
        Dispatcher::new(DispatcherConfig::default().with_idle_poll(Duration::from_millis(1))).unwrap()
    }

    #[test]
    fn test_new_is_stopped() {
        let dispatcher = threaded();
        assert!(dispatcher.is_stopped());
        assert!(dispatcher.is_in_main());
        assert!(!dispatcher.is_in_worker());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = DispatcherConfig::default().with_thread_name("");
        assert!(matches!(Dispatcher::new(config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_start_stop() {
        let dispatcher = threaded();
        dispatcher.start(true).unwrap();
        assert!(dispatcher.is_running());

        dispatcher.stop(false).unwrap();
        assert!(dispatcher.is_stopped());
    }

    #[test]
    fn test_restart_after_stop() {
        let dispatcher = threaded();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            dispatcher.start(true).unwrap();
            let hits = Arc::clone(&hits);
            dispatcher.call_worker(move || { hits.fetch_add(1, Ordering::SeqCst); }, false);
            dispatcher.stop(false).unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_start_with_runs_on_worker() {
        let dispatcher = threaded();
        let seen = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&seen);

        dispatcher
            .start_with(true, move |handle| {
                if handle.is_in_worker() && handle.is_starting() {
                    flag.store(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        dispatcher.stop(false).unwrap();
    }

    #[test]
    fn test_stop_when_never_started() {
        let dispatcher = threaded();
        assert!(dispatcher.stop(false).is_ok());
        assert!(dispatcher.stop(true).is_ok());
    }

    #[test]
    fn test_drop_stops_worker() {
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let dispatcher = threaded();
            dispatcher.start(true).unwrap();
            let hits = Arc::clone(&hits);
            dispatcher.call_worker(move || { hits.fetch_add(1, Ordering::SeqCst); }, false);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_outlives_dispatcher() {
        let dispatcher = threaded();
        dispatcher.start(true).unwrap();
        let handle = dispatcher.handle();
        drop(dispatcher);

        assert!(handle.is_stopped());
        assert_eq!(handle.pending_worker_tasks(), 0);
    }

    #[test]
    fn test_debug_output() {
        let dispatcher = threaded();
        let text = format!("{:?}", dispatcher);
        assert!(text.contains("Stopped"));
        assert!(text.contains("threaded: true"));
    }

    #[test]
    fn test_non_threaded_lifecycle() {
        let dispatcher = Dispatcher::new(DispatcherConfig::non_threaded()).unwrap();
        dispatcher.start(false).unwrap();
        assert!(dispatcher.is_running());
        assert!(dispatcher.is_idle());

        dispatcher.stop(false).unwrap();
        assert!(dispatcher.is_stopped());
    }
}
