//! Error types for retry policies and the retry driver.

use super::RetryState;
use thiserror::Error;

/// Errors returned while constructing a [`super::RetryPolicy`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetryPolicyError {
    /// At least one attempt is required.
    #[error("retry policy requires at least one attempt")]
    ZeroMaxAttempts,

    /// The initial delay is larger than the delay cap.
    #[error("initial retry delay ({initial_ms}ms) exceeds maximum delay ({max_ms}ms)")]
    InitialDelayExceedsMax {
        /// Initial delay in milliseconds.
        initial_ms: u64,
        /// Maximum delay in milliseconds.
        max_ms: u64,
    },

    /// The multiplier must be finite and strictly greater than one.
    #[error("backoff multiplier must be a finite value greater than 1, got {0}")]
    InvalidBackoffMultiplier(f64),
}

/// Terminal outcome of [`super::with_retry`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed permanently or ran out of attempts.
    #[error("operation failed after {attempts} attempt(s): {source}", attempts = .state.current_attempt())]
    Exhausted {
        /// The last error returned by the operation.
        source: E,
        /// Settled retry state describing the attempt sequence.
        state: RetryState,
    },

    /// The cancellation token fired before the operation succeeded.
    #[error("retry loop cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Number of failed attempts recorded before cancellation.
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Returns the last operation error, if the loop was not cancelled.
    #[must_use]
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. } => Some(source),
            Self::Cancelled { .. } => None,
        }
    }

    /// Returns whether the loop ended because of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
