//! Tandem Queue
//!
//! Mutex-guarded queues used to pass closures between threads.
//!
//! # Queues
//! - [`LockedQueue`]: FIFO with urgent front insertion, back-to-back
//!   deduplication (`push_single_last`), in-place merging
//!   (`push_single_combine`) and one-lock bulk draining (`pop_all`)
//! - [`LockedQueueWithSingle`]: the same, plus a key index that keeps at most
//!   one pending entry per key with O(1) replace-or-append
//!
//! Both can be built around a caller-owned [`QueueLock`] so that several
//! queues share one critical section.
//!
//! # Example
//! ```rust
//! use tandem_queue::{LockedQueue, LockedQueueWithSingle, QueueLock};
//!
//! let lock = QueueLock::new();
//! let events = LockedQueue::with_lock(lock.clone());
//! events.push("resize", false);
//! events.push_single_last("resize");
//! assert_eq!(events.pop_all(), vec!["resize"]);
//!
//! let jobs = LockedQueueWithSingle::with_lock(lock);
//! jobs.push_single(42u64, "layout v1", true);
//! jobs.push_single(42u64, "layout v2", true);
//! assert_eq!(jobs.pop(), Some("layout v2"));
//! ```

mod lock;
mod locked_queue;
mod node_list;
mod single_queue;

pub use lock::QueueLock;
pub use locked_queue::LockedQueue;
pub use single_queue::{LockedQueueWithSingle, SingleQueueView};
