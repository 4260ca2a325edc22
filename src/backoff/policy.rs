//! Immutable retry policy configuration and delay calculation.

use super::RetryPolicyError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Jitter perturbs a delay by up to this fraction in either direction.
const JITTER_RATIO: f64 = 0.25;

/// Error codes treated as transient unless a policy overrides them.
const DEFAULT_TRANSIENT_ERROR_CODES: [&str; 8] = [
    "ECONNREFUSED",
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
    "EHOSTUNREACH",
    "ENETUNREACH",
];

/// Bounded exponential backoff policy.
///
/// Policies are validated on construction and immutable afterwards. When
/// deserialised, delays are expressed in milliseconds:
///
/// ```yaml
/// max_attempts: 5
/// initial_delay_ms: 250
/// max_delay_ms: 10000
/// backoff_multiplier: 2.0
/// jitter: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRetryPolicy", into = "RawRetryPolicy")]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: bool,
    transient_error_codes: BTreeSet<String>,
}

impl RetryPolicy {
    /// Creates a policy with the default multiplier, jitter and error codes.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError::ZeroMaxAttempts`] when `max_attempts` is
    /// zero, or [`RetryPolicyError::InitialDelayExceedsMax`] when the initial
    /// delay is larger than the cap.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, RetryPolicyError> {
        if max_attempts == 0 {
            return Err(RetryPolicyError::ZeroMaxAttempts);
        }

        if initial_delay > max_delay {
            return Err(RetryPolicyError::InitialDelayExceedsMax {
                initial_ms: duration_to_millis(initial_delay),
                max_ms: duration_to_millis(max_delay),
            });
        }

        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            ..Self::default()
        })
    }

    /// Replaces the backoff multiplier.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError::InvalidBackoffMultiplier`] unless the
    /// multiplier is finite and greater than one.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Result<Self, RetryPolicyError> {
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return Err(RetryPolicyError::InvalidBackoffMultiplier(multiplier));
        }

        self.backoff_multiplier = multiplier;
        Ok(self)
    }

    /// Enables or disables delay jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the set of error codes classified as transient.
    #[must_use]
    pub fn with_transient_error_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transient_error_codes = codes
            .into_iter()
            .map(|code| code.into().trim().to_ascii_uppercase())
            .filter(|code| !code.is_empty())
            .collect();
        self
    }

    /// Returns the maximum number of calls made by one retry sequence.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay before the first retry.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Returns the upper bound applied before jitter.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns the exponential growth factor.
    #[must_use]
    pub const fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Returns whether delays are jittered.
    #[must_use]
    pub const fn jitter(&self) -> bool {
        self.jitter
    }

    /// Returns the error codes classified as transient.
    #[must_use]
    pub const fn transient_error_codes(&self) -> &BTreeSet<String> {
        &self.transient_error_codes
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
            transient_error_codes: DEFAULT_TRANSIENT_ERROR_CODES
                .iter()
                .map(|code| (*code).to_owned())
                .collect(),
        }
    }
}

/// Serialised form of [`RetryPolicy`] with millisecond delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawRetryPolicy {
    max_attempts: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    backoff_multiplier: f64,
    jitter: bool,
    transient_error_codes: BTreeSet<String>,
}

impl Default for RawRetryPolicy {
    fn default() -> Self {
        Self::from(RetryPolicy::default())
    }
}

impl From<RetryPolicy> for RawRetryPolicy {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: duration_to_millis(policy.initial_delay),
            max_delay_ms: duration_to_millis(policy.max_delay),
            backoff_multiplier: policy.backoff_multiplier,
            jitter: policy.jitter,
            transient_error_codes: policy.transient_error_codes,
        }
    }
}

impl TryFrom<RawRetryPolicy> for RetryPolicy {
    type Error = RetryPolicyError;

    fn try_from(raw: RawRetryPolicy) -> Result<Self, Self::Error> {
        Ok(Self::new(
            raw.max_attempts,
            Duration::from_millis(raw.initial_delay_ms),
            Duration::from_millis(raw.max_delay_ms),
        )?
        .with_backoff_multiplier(raw.backoff_multiplier)?
        .with_jitter(raw.jitter)
        .with_transient_error_codes(raw.transient_error_codes))
    }
}

/// Computes the delay to wait before retrying after `attempt` failures.
///
/// Attempts are numbered from 1. The jitter-free delay is
/// `min(initial_delay * multiplier^(attempt - 1), max_delay)`; with jitter
/// enabled it is scaled by a uniform factor in `[0.75, 1.25]`.
#[must_use]
#[expect(
    clippy::float_arithmetic,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "backoff delays are computed in floating-point milliseconds and clamped"
)]
pub fn calculate_retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let initial_ms = duration_to_millis(policy.initial_delay) as f64;
    let max_ms = duration_to_millis(policy.max_delay) as f64;
    let capped_ms = (initial_ms * policy.backoff_multiplier.powi(exponent)).min(max_ms);

    let delay_ms = if policy.jitter {
        let factor = rand::rng().random_range((1.0 - JITTER_RATIO)..=(1.0 + JITTER_RATIO));
        capped_ms * factor
    } else {
        capped_ms
    };

    Duration::from_millis(delay_ms.round().max(0.0) as u64)
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn deterministic_policy() -> RetryPolicy {
        RetryPolicy::new(10, Duration::from_millis(1_000), Duration::from_millis(30_000))
            .expect("valid policy")
            .with_jitter(false)
    }

    #[rstest]
    #[case(1, 1_000)]
    #[case(2, 2_000)]
    #[case(3, 4_000)]
    #[case(5, 16_000)]
    #[case(6, 30_000)]
    #[case(40, 30_000)]
    fn delay_without_jitter_follows_capped_exponential(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = deterministic_policy();

        assert_eq!(
            calculate_retry_delay(attempt, &policy),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn delay_with_custom_multiplier() {
        let policy = deterministic_policy()
            .with_backoff_multiplier(3.0)
            .expect("valid multiplier");

        assert_eq!(calculate_retry_delay(3, &policy), Duration::from_millis(9_000));
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    #[case(9)]
    fn jittered_delay_stays_within_a_quarter_of_base(#[case] attempt: u32) {
        let base = calculate_retry_delay(attempt, &deterministic_policy());
        let jittered_policy = deterministic_policy().with_jitter(true);
        let lower = base.mul_f64(0.75);
        let upper = base.mul_f64(1.25);

        for _ in 0..200 {
            let delay = calculate_retry_delay(attempt, &jittered_policy);
            assert!(
                delay >= lower && delay <= upper,
                "{delay:?} outside [{lower:?}, {upper:?}]"
            );
        }
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let result = RetryPolicy::new(0, Duration::ZERO, Duration::from_secs(1));

        assert_eq!(result, Err(RetryPolicyError::ZeroMaxAttempts));
    }

    #[test]
    fn initial_delay_above_cap_is_rejected() {
        let result = RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(1));

        assert_eq!(
            result,
            Err(RetryPolicyError::InitialDelayExceedsMax {
                initial_ms: 5_000,
                max_ms: 1_000,
            })
        );
    }

    #[rstest]
    #[case(1.0)]
    #[case(0.5)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn multiplier_must_exceed_one(#[case] multiplier: f64) {
        let result = RetryPolicy::default().with_backoff_multiplier(multiplier);

        assert!(matches!(
            result,
            Err(RetryPolicyError::InvalidBackoffMultiplier(_))
        ));
    }

    #[test]
    fn transient_codes_are_normalised() {
        let policy =
            RetryPolicy::default().with_transient_error_codes([" econnrefused ", "", "EPIPE"]);

        let codes: Vec<&str> = policy
            .transient_error_codes()
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(codes, vec!["ECONNREFUSED", "EPIPE"]);
    }

    #[test]
    fn deserialises_millisecond_fields_with_defaults() {
        let policy: RetryPolicy = serde_json::from_value(serde_json::json!({
            "max_attempts": 5,
            "initial_delay_ms": 250,
            "jitter": false
        }))
        .expect("policy should deserialise");

        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.initial_delay(), Duration::from_millis(250));
        assert_eq!(policy.max_delay(), Duration::from_millis(30_000));
        assert!(!policy.jitter());
        assert!(policy.transient_error_codes().contains("ECONNREFUSED"));
    }

    #[test]
    fn deserialisation_rejects_invalid_policy() {
        let result: Result<RetryPolicy, _> =
            serde_json::from_value(serde_json::json!({"max_attempts": 0}));

        assert!(result.is_err());
    }
}
