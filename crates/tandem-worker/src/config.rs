//! Dispatcher Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::priority::ThreadPriority;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Dispatcher configuration options.
///
/// Fixed for the lifetime of a dispatcher. Missing fields take their
/// defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Spawn a real worker thread. When false, worker passes run inside
    /// `pump_main` on the main thread.
    pub threaded: bool,

    /// Non-threaded only: calls made from the logical target context run
    /// synchronously instead of being queued
    pub direct_execution: bool,

    /// Capture supported worker panics and re-raise them from `pump_main`
    pub relay_worker_panics: bool,

    /// Both queues share one lock
    pub shared_queue_lock: bool,

    /// Worker thread name
    pub thread_name: String,

    /// Worker thread priority hint
    pub priority: ThreadPriority,

    /// Upper bound on one idle wait of the worker
    pub idle_poll: Duration,

    /// Upper bound on start/stop/clear waits; `None` waits forever
    pub transition_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            threaded: true,
            direct_execution: false,
            relay_worker_panics: false,
            shared_queue_lock: true,
            thread_name: String::from("tandem-worker"),
            priority: ThreadPriority::Normal,
            idle_poll: Duration::from_millis(10),
            transition_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl DispatcherConfig {
    /// Configuration for a dispatcher driven entirely by `pump_main`
    pub fn non_threaded() -> Self {
        Self {
            threaded: false,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the dispatcher unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_name.is_empty() {
            return Err(ConfigError::Invalid("thread_name must not be empty".into()));
        }
        if self.thread_name.contains('\0') {
            return Err(ConfigError::Invalid("thread_name must not contain NUL".into()));
        }
        if self.idle_poll.is_zero() {
            return Err(ConfigError::Invalid("idle_poll must be non-zero".into()));
        }
        if self.direct_execution && self.threaded {
            tracing::warn!("direct_execution only applies to non-threaded dispatchers; ignored");
        }
        Ok(())
    }

    pub fn with_threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    pub fn with_direct_execution(mut self, direct: bool) -> Self {
        self.direct_execution = direct;
        self
    }

    pub fn with_relay_worker_panics(mut self, relay: bool) -> Self {
        self.relay_worker_panics = relay;
        self
    }

    pub fn with_shared_queue_lock(mut self, shared: bool) -> Self {
        self.shared_queue_lock = shared;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: ThreadPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_idle_poll(mut self, poll: Duration) -> Self {
        self.idle_poll = poll;
        self
    }

    pub fn with_transition_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transition_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert!(config.threaded);
        assert!(!config.relay_worker_panics);
        assert!(config.shared_queue_lock);
        assert_eq!(config.idle_poll, Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = DispatcherConfig::from_json(
            r#"{ "threaded": false, "thread_name": "layout", "priority": "AboveNormal" }"#,
        )
        .unwrap();

        assert!(!config.threaded);
        assert_eq!(config.thread_name, "layout");
        assert_eq!(config.priority, ThreadPriority::AboveNormal);
        assert_eq!(config.transition_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_json_round_trip() {
        let config = DispatcherConfig::non_threaded()
            .with_direct_execution(true)
            .with_transition_timeout(None);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(DispatcherConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            DispatcherConfig::from_json(r#"{ "thread_name": "" }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DispatcherConfig::from_json(r#"{ "idle_poll": { "secs": 0, "nanos": 0 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DispatcherConfig::from_json("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
