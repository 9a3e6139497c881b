//! Thread Priority
//!
//! Priority hint for the worker thread. The standard library exposes no way
//! to change an OS thread's priority, so the hint is recorded on the worker
//! and reported in its logs; anything other than `Normal` is ignored.

use serde::{Deserialize, Serialize};

/// Worker thread priority hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ThreadPriority {
    Idle = 0,
    Lowest = 1,
    BelowNormal = 2,
    #[default]
    Normal = 3,
    AboveNormal = 4,
    Highest = 5,
    TimeCritical = 6,
}

impl ThreadPriority {
    /// Get priority name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Lowest => "lowest",
            Self::BelowNormal => "below-normal",
            Self::Normal => "normal",
            Self::AboveNormal => "above-normal",
            Self::Highest => "highest",
            Self::TimeCritical => "time-critical",
        }
    }

    /// Apply the hint to the calling thread.
    ///
    /// Returns whether the OS priority now matches the hint.
    pub fn apply_to_current(&self) -> bool {
        if *self == Self::Normal {
            return true;
        }
        tracing::debug!(priority = self.name(), "thread priority hint not supported here; ignored");
        false
    }
}
