//! Error types for the countdown timer engine.

use crate::timer::TimerId;

/// Top-level error type for timer control and persistence.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    /// No duration (or no display text) was supplied.
    #[error("no duration given; use e.g. `10m Tea is ready`")]
    NoDuration,

    /// A duration token did not match `<integer><s|m|h|d>` or summed to zero.
    #[error("invalid duration format: {0}")]
    InvalidFormat(String),

    /// The scope already holds the maximum number of active timers.
    #[error("too many timers in scope {scope} (max {limit})")]
    TooManyTimers {
        /// Scope that hit the cap.
        scope: i64,
        /// Configured per-scope limit.
        limit: usize,
    },

    /// The timer is unknown or already finished.
    #[error("timer {0} is no longer active")]
    NotFound(TimerId),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Snapshot read/write error.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Render sink error surfaced to a caller (artifact creation).
    #[error("render error: {0}")]
    Render(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed host command payload.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl TimerError {
    /// Returns `true` for errors caused by caller input rather than runtime state.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::NoDuration | Self::InvalidFormat(_) | Self::InvalidRequest(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TimerError>;
