//! Errors
//!
//! Lifecycle errors returned by the dispatcher and worker failures relayed to
//! the main thread.

use std::any::Any;
use std::error::Error as StdError;
use std::time::Duration;

use crate::state::ThreadState;
use crate::task::TaskId;

/// Dispatcher lifecycle error
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Worker stayed {from:?} for {waited:?} while waiting for {target:?}")]
    TransitionTimeout {
        from: ThreadState,
        target: ThreadState,
        waited: Duration,
    },

    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
}

/// A worker task failure, re-raised on the main thread by `pump_main`.
///
/// Built from the panic payload of a worker task when panic relay is enabled.
/// Only string payloads, boxed errors and `anyhow::Error` are supported; any
/// other payload terminates the worker thread.
#[derive(Debug, thiserror::Error)]
pub enum WorkerFailure {
    #[error("Worker task {task} panicked: {message}")]
    Message { task: TaskId, message: String },

    #[error("Worker task {task} failed: {error}")]
    Error {
        task: TaskId,
        #[source]
        error: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("Worker task {task} failed: {error:#}")]
    Anyhow { task: TaskId, error: anyhow::Error },
}

impl WorkerFailure {
    /// The worker task that failed
    pub fn task(&self) -> TaskId {
        match self {
            Self::Message { task, .. } | Self::Error { task, .. } | Self::Anyhow { task, .. } => {
                *task
            }
        }
    }

    /// The panic message, for string payloads
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Message { message, .. } => Some(message),
            Self::Error { .. } | Self::Anyhow { .. } => None,
        }
    }

    /// Downcast an error payload back to its original type
    pub fn downcast_ref<E: StdError + Send + Sync + 'static>(&self) -> Option<&E> {
        match self {
            Self::Error { error, .. } => error.downcast_ref::<E>(),
            Self::Anyhow { error, .. } => error.downcast_ref::<E>(),
            Self::Message { .. } => None,
        }
    }

    /// Classify a panic payload. Unsupported payloads are handed back.
    pub(crate) fn from_panic(
        task: TaskId,
        payload: Box<dyn Any + Send>,
    ) -> Result<Self, Box<dyn Any + Send>> {
        let payload = match payload.downcast::<&'static str>() {
            Ok(message) => return Ok(Self::Message { task, message: (*message).to_owned() }),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<String>() {
            Ok(message) => return Ok(Self::Message { task, message: *message }),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<anyhow::Error>() {
            Ok(error) => return Ok(Self::Anyhow { task, error: *error }),
            Err(payload) => payload,
        };
        match payload.downcast::<Box<dyn StdError + Send + Sync + 'static>>() {
            Ok(error) => Ok(Self::Error { task, error: *error }),
            Err(payload) => Err(payload),
        }
    }
}

/// Best-effort text of a panic payload, for logs and join errors
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<anyhow::Error>() {
        e.to_string()
    } else if let Some(e) = payload.downcast_ref::<Box<dyn StdError + Send + Sync + 'static>>() {
        e.to_string()
    } else {
        String::from("<non-string panic payload>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error, PartialEq)]
    #[error("layout overflow at depth {0}")]
    struct LayoutOverflow(u32);

    #[test]
    fn test_static_str_payload() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let failure = WorkerFailure::from_panic(TaskId::Auto(1), payload).unwrap();

        assert_eq!(failure.message(), Some("boom"));
        assert_eq!(failure.task(), TaskId::Auto(1));
        assert_eq!(failure.to_string(), "Worker task auto#1 panicked: boom");
    }

    #[test]
    fn test_string_payload() {
        let payload: Box<dyn Any + Send> = Box::new(format!("bad frame {}", 7));
        let failure = WorkerFailure::from_panic(TaskId::Keyed(2), payload).unwrap();
        assert_eq!(failure.message(), Some("bad frame 7"));
    }

    #[test]
    fn test_boxed_error_keeps_type() {
        let error: Box<dyn StdError + Send + Sync> = Box::new(LayoutOverflow(12));
        let payload: Box<dyn Any + Send> = Box::new(error);
        let failure = WorkerFailure::from_panic(TaskId::Auto(3), payload).unwrap();

        assert_eq!(failure.downcast_ref::<LayoutOverflow>(), Some(&LayoutOverflow(12)));
        assert!(failure.message().is_none());
        assert!(failure.source().is_some());
    }

    #[test]
    fn test_anyhow_payload_keeps_type() {
        let payload: Box<dyn Any + Send> = Box::new(anyhow::Error::new(LayoutOverflow(4)));
        let failure = WorkerFailure::from_panic(TaskId::Auto(4), payload).unwrap();

        assert_eq!(failure.downcast_ref::<LayoutOverflow>(), Some(&LayoutOverflow(4)));
    }

    #[test]
    fn test_unsupported_payload_is_returned() {
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        let payload = WorkerFailure::from_panic(TaskId::Auto(5), payload).unwrap_err();
        assert_eq!(payload.downcast_ref::<u32>(), Some(&42));
        assert_eq!(panic_message(payload.as_ref()), "<non-string panic payload>");
    }

    #[test]
    fn test_transition_timeout_display() {
        let err = DispatchError::TransitionTimeout {
            from: ThreadState::ShuttingDown,
            target: ThreadState::Stopped,
            waited: Duration::from_millis(5),
        };
        assert!(err.to_string().contains("ShuttingDown"));
    }
}
