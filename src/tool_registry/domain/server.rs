//! Supervised MCP server record and its connection state machine.

use super::{
    McpServerId, McpServerName, McpTransport, ParseConnectionStateError, ServerHealth,
    ToolRegistryDomainError,
};
use crate::backoff::RetryState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of a supervised MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpConnectionState {
    /// No connection has been attempted, or the last attempt was cancelled.
    Disconnected,
    /// The first connection attempt of a start call is running.
    Connecting,
    /// A connection is live.
    Connected,
    /// A transient failure occurred and a backoff retry is scheduled.
    Retrying,
    /// The last start call failed after exhausting its retries.
    Failed,
    /// The server was stopped explicitly.
    Stopped,
    /// A health check failed on a previously connected server.
    Error,
}

impl McpConnectionState {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Returns whether tools may be listed or invoked in this state.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns whether a start call is currently in progress.
    #[must_use]
    pub const fn is_starting(self) -> bool {
        matches!(self, Self::Connecting | Self::Retrying)
    }

    /// Returns whether transition to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (_, Self::Stopped)
                | (
                    Self::Disconnected | Self::Failed | Self::Error | Self::Stopped,
                    Self::Connecting
                )
                | (
                    Self::Connecting | Self::Retrying | Self::Error,
                    Self::Connected | Self::Retrying
                )
                | (Self::Connecting | Self::Retrying, Self::Failed)
                | (Self::Connected | Self::Failed, Self::Error)
                | (
                    Self::Connecting
                        | Self::Retrying
                        | Self::Failed
                        | Self::Error
                        | Self::Stopped
                        | Self::Disconnected,
                    Self::Disconnected
                )
        )
    }
}

impl fmt::Display for McpConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for McpConnectionState {
    type Error = ParseConnectionStateError;

    fn try_from(value: &str) -> Result<Self, ParseConnectionStateError> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "retrying" => Ok(Self::Retrying),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            _ => Err(ParseConnectionStateError(value.to_owned())),
        }
    }
}

const fn enabled_by_default() -> bool {
    true
}

/// User-supplied configuration of one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Stable identifier.
    pub id: McpServerId,
    /// Display name.
    pub name: McpServerName,
    /// Connection descriptor.
    pub transport: McpTransport,
    /// User intent to run this server.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl McpServerConfig {
    /// Creates an enabled server configuration.
    #[must_use]
    pub const fn new(id: McpServerId, name: McpServerName, transport: McpTransport) -> Self {
        Self {
            id,
            name,
            transport,
            enabled: true,
        }
    }

    /// Sets the initial user intent.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Supervisor-owned record of one configured server.
///
/// `enabled` is user intent and `auto_disabled` is the supervisor's
/// override; `auto_disabled` always implies `!enabled`. `failure_count`
/// counts consecutive whole start calls that failed and is independent of
/// the per-sequence attempt counter in [`RetryState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct McpServerRecord {
    config: McpServerConfig,
    enabled: bool,
    auto_disabled: bool,
    failure_count: u32,
    connection_state: McpConnectionState,
    retry_state: RetryState,
    health_retry_state: RetryState,
    last_health_check: Option<DateTime<Utc>>,
}

impl McpServerRecord {
    /// Creates a disconnected record from configuration.
    #[must_use]
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            enabled: config.enabled,
            config,
            auto_disabled: false,
            failure_count: 0,
            connection_state: McpConnectionState::Disconnected,
            retry_state: RetryState::initial(),
            health_retry_state: RetryState::initial(),
            last_health_check: None,
        }
    }

    /// Returns the server identifier.
    #[must_use]
    pub const fn id(&self) -> &McpServerId {
        &self.config.id
    }

    /// Returns the display name.
    #[must_use]
    pub const fn name(&self) -> &McpServerName {
        &self.config.name
    }

    /// Returns the configuration the record was created from.
    #[must_use]
    pub const fn config(&self) -> &McpServerConfig {
        &self.config
    }

    /// Returns whether the server is enabled.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns whether the supervisor disabled the server.
    #[must_use]
    pub const fn auto_disabled(&self) -> bool {
        self.auto_disabled
    }

    /// Returns the number of consecutive failed start calls.
    #[must_use]
    pub const fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Returns the connection state.
    #[must_use]
    pub const fn connection_state(&self) -> McpConnectionState {
        self.connection_state
    }

    /// Returns the retry state of the latest start call.
    #[must_use]
    pub const fn retry_state(&self) -> &RetryState {
        &self.retry_state
    }

    /// Returns the retry state of the latest health-triggered reconnect.
    #[must_use]
    pub const fn health_retry_state(&self) -> &RetryState {
        &self.health_retry_state
    }

    /// Returns when the last health check ran.
    #[must_use]
    pub const fn last_health_check(&self) -> Option<DateTime<Utc>> {
        self.last_health_check
    }

    /// Builds a health snapshot of this record.
    #[must_use]
    pub fn health(&self) -> ServerHealth {
        ServerHealth::from_record(self)
    }

    /// Begins a start call.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::ServerDisabled`] when the server is
    /// disabled and
    /// [`ToolRegistryDomainError::InvalidConnectionTransition`] when a start
    /// is already running or the server is connected.
    pub fn begin_start(&mut self) -> Result<(), ToolRegistryDomainError> {
        self.ensure_enabled()?;
        self.transition_to(McpConnectionState::Connecting)?;
        self.retry_state = RetryState::initial();
        Ok(())
    }

    /// Records that a backoff retry is scheduled for the running start call.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::InvalidConnectionTransition`] when
    /// no start call is running.
    pub fn mark_retrying(&mut self, retry_state: RetryState) -> Result<(), ToolRegistryDomainError> {
        self.transition_to(McpConnectionState::Retrying)?;
        self.retry_state = retry_state;
        Ok(())
    }

    /// Records a successful start call and resets the failure count.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::InvalidConnectionTransition`] when
    /// no start call is running.
    pub fn mark_connected(&mut self) -> Result<(), ToolRegistryDomainError> {
        self.transition_to(McpConnectionState::Connected)?;
        self.failure_count = 0;
        self.retry_state = RetryState::initial();
        Ok(())
    }

    /// Records a start call that failed after its retries.
    ///
    /// Returns `true` when this failure reached `failure_threshold` and the
    /// server was auto-disabled.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::InvalidConnectionTransition`] when
    /// no start call is running.
    pub fn record_start_failure(
        &mut self,
        retry_state: RetryState,
        failure_threshold: u32,
    ) -> Result<bool, ToolRegistryDomainError> {
        self.transition_to(McpConnectionState::Failed)?;
        self.retry_state = retry_state;
        self.failure_count = self.failure_count.saturating_add(1);

        if self.auto_disabled || self.failure_count < failure_threshold {
            return Ok(false);
        }

        self.auto_disabled = true;
        self.enabled = false;
        Ok(true)
    }

    /// Records that a start call was cancelled before it finished.
    ///
    /// A cancelled start is not a failure and leaves the failure count
    /// untouched. A record stopped in the meantime stays stopped.
    pub fn mark_start_cancelled(&mut self) {
        if self.connection_state.is_starting() {
            self.connection_state = McpConnectionState::Disconnected;
            self.retry_state = self.retry_state.settled();
        }
    }

    /// Marks the server as stopped.
    pub fn mark_stopped(&mut self) {
        self.connection_state = McpConnectionState::Stopped;
        self.retry_state = self.retry_state.settled();
        self.health_retry_state = self.health_retry_state.settled();
    }

    /// Records a passing health check.
    pub const fn record_health_check(&mut self, checked_at: DateTime<Utc>) {
        self.last_health_check = Some(checked_at);
    }

    /// Records a failing health check and moves to `error`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::InvalidConnectionTransition`] unless
    /// the server is `connected` or `failed`.
    pub fn mark_unhealthy(&mut self, checked_at: DateTime<Utc>) -> Result<(), ToolRegistryDomainError> {
        self.transition_to(McpConnectionState::Error)?;
        self.last_health_check = Some(checked_at);
        self.health_retry_state = RetryState::initial();
        Ok(())
    }

    /// Stores progress of a health-triggered reconnect.
    pub fn note_health_retry(&mut self, retry_state: RetryState) {
        self.health_retry_state = retry_state;
    }

    /// Records a successful health-triggered reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::InvalidConnectionTransition`] unless
    /// the server is in `error`.
    pub fn mark_reconnected(&mut self) -> Result<(), ToolRegistryDomainError> {
        if self.connection_state != McpConnectionState::Error {
            return Err(self.invalid_transition(McpConnectionState::Connected));
        }
        self.connection_state = McpConnectionState::Connected;
        self.health_retry_state = RetryState::initial();
        Ok(())
    }

    /// Clears the auto-disable override and every failure counter.
    ///
    /// The record returns to `disconnected` and is enabled again.
    pub fn reenable(&mut self) {
        self.enabled = true;
        self.auto_disabled = false;
        self.failure_count = 0;
        self.retry_state = RetryState::initial();
        self.health_retry_state = RetryState::initial();
        if self.connection_state != McpConnectionState::Connected {
            self.connection_state = McpConnectionState::Disconnected;
        }
    }

    /// Records the user's intent to disable the server.
    pub const fn disable(&mut self) {
        self.enabled = false;
    }

    /// Validates that tools may be listed or invoked.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::ServerDisabled`] when the server is
    /// disabled, or [`ToolRegistryDomainError::ServerNotConnected`] when no
    /// connection is live.
    pub fn ensure_live(&self) -> Result<(), ToolRegistryDomainError> {
        self.ensure_enabled()?;
        if self.connection_state.is_live() {
            return Ok(());
        }

        Err(ToolRegistryDomainError::ServerNotConnected {
            server_id: self.id().clone(),
            state: self.connection_state.as_str().to_owned(),
        })
    }

    fn ensure_enabled(&self) -> Result<(), ToolRegistryDomainError> {
        if self.enabled {
            return Ok(());
        }

        Err(ToolRegistryDomainError::ServerDisabled {
            server_id: self.id().clone(),
            auto_disabled: self.auto_disabled,
        })
    }

    fn transition_to(
        &mut self,
        target_state: McpConnectionState,
    ) -> Result<(), ToolRegistryDomainError> {
        if !self.connection_state.can_transition_to(target_state) {
            return Err(self.invalid_transition(target_state));
        }

        self.connection_state = target_state;
        Ok(())
    }

    fn invalid_transition(&self, target_state: McpConnectionState) -> ToolRegistryDomainError {
        ToolRegistryDomainError::InvalidConnectionTransition {
            server_id: self.id().clone(),
            from: self.connection_state.as_str().to_owned(),
            to: target_state.as_str().to_owned(),
        }
    }
}
