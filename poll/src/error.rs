//! Error types for the poll crate.

use std::time::Duration;

/// Errors returned by [`Poll`](crate::Poll) and its configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PollError {
    /// A numeric backoff growth factor below 1 (or not finite)
    #[error("Poll backoff growth factor must be at least 1, got {0}")]
    InvalidBackoff(f64),

    /// The interval is negative after rounding or larger than `max`
    #[error("Poll interval must be between 0 and max: interval {interval:?}, max {max:?}")]
    InvalidInterval {
        /// The rejected interval
        interval: Duration,
        /// The configured maximum
        max: Duration,
    },

    /// The maximum exceeds [`MAX_INTERVAL`](crate::MAX_INTERVAL)
    #[error("Max interval must be less than {limit:?}, got {max:?}")]
    MaxIntervalTooLarge {
        /// The rejected maximum
        max: Duration,
        /// The platform ceiling
        limit: Duration,
    },

    /// The poll was disposed while the caller was waiting on it
    #[error("Poll ({name}) is disposed")]
    Disposed {
        /// Name of the disposed poll
        name: String,
    },
}

/// Convenience type alias for Results using PollError.
pub type Result<T> = std::result::Result<T, PollError>;
