//! Tunables for the server supervisor.

use crate::backoff::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;

/// Errors returned while validating [`SupervisorSettings`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorSettingsError {
    /// The auto-disable threshold must allow at least one failure.
    #[error("failure threshold must be at least 1")]
    ZeroFailureThreshold,

    /// Health checks need a non-zero period.
    #[error("health check interval must be greater than zero")]
    ZeroHealthCheckInterval,
}

/// Supervisor configuration.
///
/// ```yaml
/// failure_threshold: 3
/// health_check_interval_ms: 30000
/// retry_policy:
///   max_attempts: 3
///   initial_delay_ms: 1000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSupervisorSettings", into = "RawSupervisorSettings")]
pub struct SupervisorSettings {
    failure_threshold: u32,
    health_check_interval: Duration,
    retry_policy: RetryPolicy,
}

impl SupervisorSettings {
    /// Creates validated settings.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorSettingsError`] when the threshold or the health
    /// check interval is zero.
    pub fn new(
        failure_threshold: u32,
        health_check_interval: Duration,
        retry_policy: RetryPolicy,
    ) -> Result<Self, SupervisorSettingsError> {
        if failure_threshold == 0 {
            return Err(SupervisorSettingsError::ZeroFailureThreshold);
        }
        if health_check_interval.is_zero() {
            return Err(SupervisorSettingsError::ZeroHealthCheckInterval);
        }

        Ok(Self {
            failure_threshold,
            health_check_interval,
            retry_policy,
        })
    }

    /// Returns how many consecutive failed start calls disable a server.
    #[must_use]
    pub const fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Returns the health monitor period.
    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    /// Returns the backoff policy for connection attempts.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            health_check_interval: Duration::from_millis(DEFAULT_HEALTH_CHECK_INTERVAL_MS),
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawSupervisorSettings {
    failure_threshold: u32,
    health_check_interval_ms: u64,
    retry_policy: RetryPolicy,
}

impl Default for RawSupervisorSettings {
    fn default() -> Self {
        Self::from(SupervisorSettings::default())
    }
}

impl From<SupervisorSettings> for RawSupervisorSettings {
    fn from(settings: SupervisorSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            health_check_interval_ms: u64::try_from(settings.health_check_interval.as_millis())
                .unwrap_or(u64::MAX),
            retry_policy: settings.retry_policy,
        }
    }
}

impl TryFrom<RawSupervisorSettings> for SupervisorSettings {
    type Error = SupervisorSettingsError;

    fn try_from(raw: RawSupervisorSettings) -> Result<Self, Self::Error> {
        Self::new(
            raw.failure_threshold,
            Duration::from_millis(raw.health_check_interval_ms),
            raw.retry_policy,
        )
    }
}
