//! Comprehensive tests for tandem-worker
//!
//! Round trips between the two threads, ordering guarantees, lifecycle
//! idempotence and relay of worker failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tandem_worker::{DispatchError, Dispatcher, DispatcherConfig, TaskId, ThreadState, WorkerFailure};

fn fast_config() -> DispatcherConfig {
    DispatcherConfig::default()
        .with_idle_poll(Duration::from_millis(1))
        .with_transition_timeout(Some(Duration::from_secs(10)))
}

fn started(config: DispatcherConfig) -> Dispatcher {
    let dispatcher = Dispatcher::new(config).unwrap();
    dispatcher.start(true).unwrap();
    dispatcher
}

// ============================================================================
// ROUND TRIPS
// ============================================================================

#[test]
fn test_thousand_tasks_call_back_once_each() {
    let dispatcher = started(fast_config());
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..1000 {
        let handle = dispatcher.handle();
        let counter = Arc::clone(&counter);
        dispatcher.call_worker(
            move || {
                let counter = Arc::clone(&counter);
                handle.call_main(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            },
            false,
        );
    }

    dispatcher.stop(false).unwrap();
    dispatcher.pump_main().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1000);
    assert_eq!(dispatcher.pending_main_tasks(), 0);
}

#[test]
fn test_round_trip_with_separate_locks() {
    let dispatcher = started(fast_config().with_shared_queue_lock(false));
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..200 {
        let handle = dispatcher.handle();
        let counter = Arc::clone(&counter);
        dispatcher.call_worker(
            move || {
                let counter = Arc::clone(&counter);
                handle.call_main(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            },
            false,
        );
    }

    // Pump while the worker is still producing
    let mut pumped = 0;
    while pumped < 200 {
        pumped += dispatcher.pump_main().unwrap();
        thread::yield_now();
    }
    dispatcher.stop(false).unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 200);
}

#[test]
fn test_worker_tasks_run_in_order() {
    let dispatcher = started(fast_config());
    let log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..100 {
        let log = Arc::clone(&log);
        dispatcher.call_worker(move || log.lock().unwrap().push(i), false);
    }
    dispatcher.stop(false).unwrap();

    assert_eq!(*log.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_tasks_run_on_worker_thread() {
    let dispatcher = started(fast_config().with_thread_name("layout"));
    let seen = Arc::new(Mutex::new(None));

    let handle = dispatcher.handle();
    let slot = Arc::clone(&seen);
    let id = dispatcher.call_worker(
        move || {
            let name = thread::current().name().map(str::to_owned);
            *slot.lock().unwrap() = Some((name, handle.is_in_worker(), handle.current_worker_task_id()));
        },
        false,
    );
    dispatcher.wake_up(true);

    let (name, in_worker, current) = seen.lock().unwrap().take().unwrap();
    assert_eq!(name.as_deref(), Some("layout"));
    assert!(in_worker);
    assert_eq!(current, Some(id));

    dispatcher.stop(false).unwrap();
}

// ============================================================================
// ORDERING
// ============================================================================

#[test]
fn test_re_enqueue_runs_again_before_later_tasks() {
    let dispatcher = started(fast_config());
    let log = Arc::new(Mutex::new(Vec::new()));
    dispatcher.pause(true);

    let handle = dispatcher.handle();
    let attempts = Arc::new(AtomicUsize::new(0));
    let retry_log = Arc::clone(&log);
    dispatcher.call_worker(
        move || {
            retry_log.lock().unwrap().push("retry");
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                handle.re_enqueue();
            }
        },
        false,
    );
    let later_log = Arc::clone(&log);
    dispatcher.call_worker(move || later_log.lock().unwrap().push("later"), false);

    dispatcher.resume();
    dispatcher.stop(false).unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["retry", "retry", "retry", "later"]);
}

#[test]
fn test_urgent_call_jumps_the_queue() {
    let dispatcher = started(fast_config());
    let log = Arc::new(Mutex::new(Vec::new()));
    dispatcher.pause(true);

    for name in ["a", "b"] {
        let log = Arc::clone(&log);
        dispatcher.call_worker(move || log.lock().unwrap().push(name), false);
    }
    let urgent = Arc::clone(&log);
    dispatcher.call_worker(move || urgent.lock().unwrap().push("urgent"), true);

    dispatcher.resume();
    dispatcher.stop(false).unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["urgent", "a", "b"]);
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[test]
fn test_remove_worker_task() {
    let dispatcher = started(fast_config());

    let done = dispatcher.call_worker(|| {}, false);
    dispatcher.wake_up(true);
    assert!(!dispatcher.remove_worker_task(done));

    dispatcher.pause(true);
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let pending = dispatcher.call_worker(move || { counter.fetch_add(1, Ordering::SeqCst); }, false);

    assert!(dispatcher.has_worker_task(pending));
    assert!(dispatcher.remove_worker_task(pending));
    assert!(!dispatcher.has_worker_task(pending));
    assert!(!dispatcher.still_enqueued(pending));

    dispatcher.resume();
    dispatcher.stop(false).unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_remove_keyed_worker_task() {
    let dispatcher = started(fast_config());
    dispatcher.pause(true);

    let id = dispatcher.call_worker_single(11, || {});
    assert_eq!(id, TaskId::Keyed(11));
    assert!(dispatcher.remove_worker_task(id));
    assert!(!dispatcher.remove_worker_task(id));

    dispatcher.stop(false).unwrap();
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn test_double_start_is_idempotent() {
    let dispatcher = Dispatcher::new(fast_config()).unwrap();
    let startups = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let startups = Arc::clone(&startups);
        dispatcher
            .start_with(true, move |_| {
                startups.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(dispatcher.state(), ThreadState::Running);
    }

    assert_eq!(startups.load(Ordering::SeqCst), 1);
    dispatcher.stop(false).unwrap();
}

#[test]
fn test_pause_defers_without_losing_tasks() {
    let dispatcher = started(fast_config());
    let ran = Arc::new(AtomicUsize::new(0));

    dispatcher.pause(true);
    assert!(dispatcher.is_paused());
    for _ in 0..5 {
        let ran = Arc::clone(&ran);
        dispatcher.call_worker(move || { ran.fetch_add(1, Ordering::SeqCst); }, false);
    }

    thread::sleep(Duration::from_millis(30));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(dispatcher.pending_worker_tasks(), 5);

    dispatcher.resume();
    dispatcher.wake_up(true);
    assert_eq!(ran.load(Ordering::SeqCst), 5);

    dispatcher.stop(false).unwrap();
}

#[test]
fn test_stop_while_paused_drains() {
    let dispatcher = started(fast_config());
    let ran = Arc::new(AtomicUsize::new(0));

    dispatcher.pause(true);
    for _ in 0..10 {
        let ran = Arc::clone(&ran);
        dispatcher.call_worker(move || { ran.fetch_add(1, Ordering::SeqCst); }, false);
    }
    dispatcher.stop(false).unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 10);
    assert!(!dispatcher.is_paused());
}

// ============================================================================
// FAILURE RELAY
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("glyph cache overflow ({0} entries)")]
struct GlyphOverflow(usize);

fn relay_dispatcher() -> Dispatcher {
    started(fast_config().with_relay_worker_panics(true))
}

fn relayed_failure<P>(payload: P) -> WorkerFailure
where
    P: std::any::Any + Send + Clone + 'static,
{
    let dispatcher = relay_dispatcher();
    let task = dispatcher.call_worker(move || std::panic::panic_any(payload.clone()), false);
    dispatcher.wake_up(true);

    let failure = dispatcher.pump_main().unwrap_err();
    assert_eq!(failure.task(), task);
    assert!(dispatcher.is_running());
    dispatcher.stop(false).unwrap();
    failure
}

#[test]
fn test_relay_static_str() {
    let failure = relayed_failure("texture upload failed");
    assert_eq!(failure.message(), Some("texture upload failed"));
}

#[test]
fn test_relay_string() {
    let failure = relayed_failure(String::from("frame 12 dropped"));
    assert_eq!(failure.message(), Some("frame 12 dropped"));
}

#[test]
fn test_relay_anyhow_error() {
    let dispatcher = relay_dispatcher();
    dispatcher.call_worker(|| std::panic::panic_any(anyhow::Error::new(GlyphOverflow(3))), false);
    dispatcher.wake_up(true);

    let failure = dispatcher.pump_main().unwrap_err();
    assert_eq!(failure.downcast_ref::<GlyphOverflow>(), Some(&GlyphOverflow(3)));
    assert!(failure.to_string().contains("glyph cache overflow"));
    dispatcher.stop(false).unwrap();
}

#[test]
fn test_relay_boxed_error() {
    let dispatcher = relay_dispatcher();
    dispatcher.call_worker(
        || {
            let error: Box<dyn std::error::Error + Send + Sync> = Box::new(GlyphOverflow(9));
            std::panic::panic_any(error)
        },
        false,
    );
    dispatcher.wake_up(true);

    let failure = dispatcher.pump_main().unwrap_err();
    assert_eq!(failure.downcast_ref::<GlyphOverflow>(), Some(&GlyphOverflow(9)));
    dispatcher.stop(false).unwrap();
}

#[test]
fn test_worker_survives_relayed_failure() {
    let dispatcher = relay_dispatcher();
    let ran = Arc::new(AtomicUsize::new(0));

    dispatcher.call_worker(|| panic!("first"), false);
    let counter = Arc::clone(&ran);
    dispatcher.call_worker(move || { counter.fetch_add(1, Ordering::SeqCst); }, false);
    dispatcher.wake_up(true);

    assert!(dispatcher.pump_main().is_err());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.pump_main().unwrap(), 0);
    dispatcher.stop(false).unwrap();
}

#[test]
fn test_unsupported_payload_kills_worker_even_with_relay() {
    let dispatcher = relay_dispatcher();
    dispatcher.call_worker(|| std::panic::panic_any(7u32), false);
    dispatcher.wake_up(true);

    assert!(dispatcher.is_stopped());
    assert!(matches!(dispatcher.stop(false), Err(DispatchError::WorkerPanicked(_))));
    assert_eq!(dispatcher.pump_main().unwrap(), 0);
}
