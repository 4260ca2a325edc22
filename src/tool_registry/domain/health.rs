//! Health snapshot of a supervised MCP server.

use super::{McpConnectionState, McpServerId, McpServerRecord};
use crate::backoff::RetryState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time health view of one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHealth {
    /// Server identifier.
    pub server_id: McpServerId,
    /// Connection state.
    pub connection_state: McpConnectionState,
    /// Whether the server is enabled.
    pub enabled: bool,
    /// Whether the supervisor disabled the server after repeated failures.
    pub auto_disabled: bool,
    /// Consecutive failed start calls.
    pub failure_count: u32,
    /// Retry progress of the latest start call.
    pub retry_state: RetryState,
    /// Retry progress of the latest health-triggered reconnect.
    pub health_retry_state: RetryState,
    /// When the last health check ran.
    pub last_health_check: Option<DateTime<Utc>>,
}

impl ServerHealth {
    pub(crate) fn from_record(record: &McpServerRecord) -> Self {
        Self {
            server_id: record.id().clone(),
            connection_state: record.connection_state(),
            enabled: record.enabled(),
            auto_disabled: record.auto_disabled(),
            failure_count: record.failure_count(),
            retry_state: record.retry_state().clone(),
            health_retry_state: record.health_retry_state().clone(),
            last_health_check: record.last_health_check(),
        }
    }

    /// Returns whether the server can serve tool calls right now.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.enabled && self.connection_state.is_live()
    }
}
