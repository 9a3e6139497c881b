//! Tandem Worker
//!
//! A dispatcher that gives an object one dedicated worker thread and lets it
//! exchange closures with the thread that owns it.
//!
//! # Features
//! - Controlled lifecycle (`Stopped`, `Starting`, `Running`, `ShuttingDown`)
//!   with condition-variable waits bounded by a configurable timeout
//! - Keyed single-instance calls that replace or collapse a pending call
//! - Urgent front-of-queue calls, pause/resume, cooperative re-enqueue
//! - Optional relay of worker panics to the main thread as [`WorkerFailure`]
//! - A non-threaded mode that runs worker passes inside [`DispatcherHandle::pump_main`]
//!
//! # Example
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use tandem_worker::{Dispatcher, DispatcherConfig};
//!
//! let dispatcher = Dispatcher::new(DispatcherConfig::default())?;
//! dispatcher.start(true)?;
//!
//! let done = Arc::new(AtomicUsize::new(0));
//! let handle = dispatcher.handle();
//! let counter = Arc::clone(&done);
//! dispatcher.call_worker(move || {
//!     let counter = Arc::clone(&counter);
//!     handle.call_main(move || { counter.fetch_add(1, Ordering::SeqCst); });
//! }, false);
//!
//! dispatcher.stop(false)?;
//! dispatcher.pump_main()?;
//! assert_eq!(done.load(Ordering::SeqCst), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod check;
mod config;
mod dispatcher;
mod error;
mod priority;
mod state;
mod task;

pub use config::{ConfigError, DispatcherConfig};
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use error::{DispatchError, WorkerFailure};
pub use priority::ThreadPriority;
pub use state::ThreadState;
pub use task::{TaskFn, TaskId};
