//! Mutable bookkeeping for one retry sequence.

use super::{RetryPolicy, calculate_retry_delay};
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Progress of a retry sequence.
///
/// `current_attempt` counts failed attempts in this sequence only. It is
/// distinct from a server's whole-call failure count.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryState {
    is_retrying: bool,
    current_attempt: u32,
    next_retry_at: Option<DateTime<Utc>>,
    backoff_intervals: Vec<Duration>,
    last_error: Option<String>,
}

impl RetryState {
    /// Returns the state of a sequence that has not failed yet.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            is_retrying: false,
            current_attempt: 0,
            next_retry_at: None,
            backoff_intervals: Vec::new(),
            last_error: None,
        }
    }

    /// Records a failed attempt and schedules the next one.
    ///
    /// The attempt counter is incremented and the error message stored. Once
    /// the policy's attempt budget is spent the returned state is terminal:
    /// no delay is appended and `next_retry_at` is cleared. Otherwise the
    /// next delay is appended and `next_retry_at` is set relative to `clock`.
    ///
    /// The state turns terminal when the counter reaches `max_attempts`
    /// rather than when it exceeds it, so a terminal state always matches
    /// the last call [`crate::backoff::with_retry`] makes.
    #[must_use]
    pub fn record_failure(
        &self,
        error: &impl fmt::Display,
        policy: &RetryPolicy,
        clock: &impl Clock,
    ) -> Self {
        let mut next = self.clone();
        next.current_attempt = self.current_attempt.saturating_add(1);
        next.last_error = Some(error.to_string());

        if next.current_attempt >= policy.max_attempts() {
            next.is_retrying = false;
            next.next_retry_at = None;
            return next;
        }

        let delay = calculate_retry_delay(next.current_attempt, policy);
        next.backoff_intervals.push(delay);
        next.next_retry_at = TimeDelta::from_std(delay)
            .ok()
            .and_then(|offset| clock.utc().checked_add_signed(offset));
        next.is_retrying = true;
        next
    }

    /// Returns a copy that no longer schedules a retry.
    ///
    /// A delay computed for a retry that will not happen is dropped from the
    /// interval history.
    #[must_use]
    pub fn settled(&self) -> Self {
        let mut next = self.clone();
        if next.is_retrying {
            next.backoff_intervals.pop();
        }
        next.is_retrying = false;
        next.next_retry_at = None;
        next
    }

    /// Returns whether a retry is scheduled.
    #[must_use]
    pub const fn is_retrying(&self) -> bool {
        self.is_retrying
    }

    /// Returns the number of failed attempts recorded.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Returns when the next retry is due.
    #[must_use]
    pub const fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.next_retry_at
    }

    /// Returns the delays scheduled so far, in order.
    #[must_use]
    pub fn backoff_intervals(&self) -> &[Duration] {
        &self.backoff_intervals
    }

    /// Returns the most recently scheduled delay.
    #[must_use]
    pub fn last_delay(&self) -> Option<Duration> {
        self.backoff_intervals.last().copied()
    }

    /// Returns the message of the last recorded failure.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
