//! Retry-loop driver.

use super::{RetryError, RetryPolicy, RetryState, RetryableError, is_transient_error};
use mockable::Clock;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Details passed to the retry observer before each backoff wait.
#[derive(Debug)]
pub struct RetryNotice<'a, E> {
    /// Number of failed attempts so far.
    pub attempt: u32,
    /// Delay before the next attempt.
    pub delay: Duration,
    /// Error returned by the failed attempt.
    pub error: &'a E,
    /// Retry state after recording the failure.
    pub state: &'a RetryState,
}

/// Returns whether another attempt should be made after `error`.
///
/// `state` must already include the failure (see
/// [`RetryState::record_failure`]). Returns `false` once the attempt budget
/// is spent and otherwise defers to [`is_transient_error`].
#[must_use]
pub fn should_retry<E>(error: &E, state: &RetryState, policy: &RetryPolicy) -> bool
where
    E: RetryableError + ?Sized,
{
    state.current_attempt() < policy.max_attempts() && is_transient_error(error, policy)
}

/// Runs `operation` until it succeeds, fails permanently, or exhausts the
/// policy.
///
/// The operation is called at most `policy.max_attempts()` times. Before
/// each backoff wait `on_retry` receives a [`RetryNotice`]. Cancelling
/// `cancel` aborts an in-progress attempt or backoff wait immediately and
/// returns [`RetryError::Cancelled`] without calling the operation again.
///
/// # Errors
///
/// Returns [`RetryError::Exhausted`] carrying the last error when the
/// failure is permanent or no attempts remain, and
/// [`RetryError::Cancelled`] on cancellation.
pub async fn with_retry<T, E, F, Fut, N>(
    policy: &RetryPolicy,
    clock: &impl Clock,
    cancel: &CancellationToken,
    mut operation: F,
    mut on_retry: N,
) -> Result<T, RetryError<E>>
where
    E: RetryableError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnMut(RetryNotice<'_, E>),
{
    let mut state = RetryState::initial();

    loop {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(RetryError::Cancelled {
                    attempts: state.current_attempt(),
                });
            }
            outcome = operation() => outcome,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        state = state.record_failure(&error, policy, clock);
        if !should_retry(&error, &state, policy) {
            return Err(RetryError::Exhausted {
                source: error,
                state: state.settled(),
            });
        }

        let delay = state.last_delay().unwrap_or_default();
        debug!(
            attempt = state.current_attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "transient failure, backing off"
        );
        on_retry(RetryNotice {
            attempt: state.current_attempt(),
            delay,
            error: &error,
            state: &state,
        });

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(RetryError::Cancelled {
                    attempts: state.current_attempt(),
                });
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}
