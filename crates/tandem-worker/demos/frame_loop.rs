//! Example: a per-frame driver for a dispatcher
//!
//! The main thread plays a render loop: it feeds input events, asks the worker
//! for a layout once per frame (collapsing requests the worker has not picked
//! up yet), and pumps the main queue to apply finished layouts.
//!
//! Run with `RUST_LOG=tandem_worker=trace` to see every dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tandem_queue::LockedQueue;
use tandem_worker::{Dispatcher, DispatcherConfig, ThreadPriority};
use tracing_subscriber::EnvFilter;

const LAYOUT_KEY: u64 = 1;
const FRAMES: u32 = 12;

#[derive(Debug, Clone, PartialEq)]
enum InputEvent {
    Resize { width: u32, height: u32 },
    Click { x: u32, y: u32 },
}

#[derive(Debug, Default)]
struct Viewport {
    width: u32,
    height: u32,
    layouts_applied: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("viewport {0}x{1} is too small to lay out")]
struct TooSmall(u32, u32);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DispatcherConfig::default()
        .with_thread_name("layout")
        .with_priority(ThreadPriority::AboveNormal)
        .with_relay_worker_panics(true);
    let dispatcher = Dispatcher::new(config).context("invalid dispatcher config")?;
    dispatcher.start(true)?;

    let events = Arc::new(LockedQueue::new());
    let viewport = Arc::new(Mutex::new(Viewport::default()));
    let generation = Arc::new(AtomicU64::new(0));

    for frame in 0..FRAMES {
        // Bursts of resizes collapse into the last one
        for step in 0..3 {
            let resize = InputEvent::Resize {
                width: 40 * frame + step,
                height: 30 * frame + step,
            };
            events.push_single_combine_by(
                resize,
                |last, _| matches!(last, InputEvent::Resize { .. }),
                |last, next| *last = next,
            );
        }
        if frame % 4 == 0 {
            events.push(InputEvent::Click { x: frame, y: frame }, false);
        }

        let batch = events.pop_all();
        let mut size = None;
        for event in &batch {
            match event {
                InputEvent::Resize { width, height } => size = Some((*width, *height)),
                InputEvent::Click { x, y } => tracing::info!(x, y, "click"),
            }
        }
        tracing::debug!(frame, events = batch.len(), "input drained");

        if let Some((width, height)) = size {
            let handle = dispatcher.handle();
            let viewport = Arc::clone(&viewport);
            let generation = Arc::clone(&generation);
            dispatcher.call_worker_single(LAYOUT_KEY, move || {
                if width < 10 {
                    std::panic::panic_any(anyhow::Error::new(TooSmall(width, height)));
                }
                // Stand-in for real layout work
                thread::sleep(Duration::from_millis(2));
                let stamp = generation.fetch_add(1, Ordering::Relaxed) + 1;

                let viewport = Arc::clone(&viewport);
                handle.call_main_single(LAYOUT_KEY, move || {
                    let mut viewport = viewport.lock().unwrap_or_else(|e| e.into_inner());
                    viewport.width = width;
                    viewport.height = height;
                    viewport.layouts_applied += 1;
                    tracing::info!(width, height, stamp, "layout applied");
                });
            });
        }

        match dispatcher.pump_main() {
            Ok(executed) => tracing::debug!(frame, executed, "frame pumped"),
            Err(failure) => tracing::warn!(frame, error = %failure, "layout failed"),
        }
        thread::sleep(Duration::from_millis(16));
    }

    dispatcher.stop(false)?;
    if let Err(failure) = dispatcher.pump_main() {
        tracing::warn!(error = %failure, "layout failed during shutdown");
    }
    dispatcher.pump_main().ok();

    let viewport = viewport.lock().unwrap_or_else(|e| e.into_inner());
    println!(
        "Final viewport {}x{} after {} layouts",
        viewport.width, viewport.height, viewport.layouts_applied
    );
    Ok(())
}
