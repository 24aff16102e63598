//! Error types for rate-limited invocations

use thiserror::Error;

/// Why an invocation did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError<U> {
    /// The wrapped function failed
    #[error("Invocation rejected: {0}")]
    Rejected(U),

    #[error("Rate limiter stopped before the invocation ran")]
    Stopped,

    #[error("Rate limiter is disposed")]
    Disposed,
}

impl<U> RateLimitError<U> {
    /// The wrapped function's error, if that is why the invocation failed.
    pub fn rejected(&self) -> Option<&U> {
        match self {
            Self::Rejected(error) => Some(error),
            _ => None,
        }
    }
}

pub type Result<T, U> = std::result::Result<T, RateLimitError<U>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error: RateLimitError<String> = RateLimitError::Rejected("timeout".to_string());
        assert_eq!(error.to_string(), "Invocation rejected: timeout");

        let error: RateLimitError<String> = RateLimitError::Stopped;
        assert_eq!(
            error.to_string(),
            "Rate limiter stopped before the invocation ran"
        );

        let error: RateLimitError<String> = RateLimitError::Disposed;
        assert_eq!(error.to_string(), "Rate limiter is disposed");
    }

    #[test]
    fn test_rejected_accessor() {
        assert_eq!(RateLimitError::Rejected(3).rejected(), Some(&3));
        assert_eq!(RateLimitError::<u8>::Stopped.rejected(), None);
    }
}
