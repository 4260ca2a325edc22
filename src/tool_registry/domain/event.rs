//! Notifications emitted by the server supervisor.

use super::McpServerId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A supervisor state change.
///
/// Events for one server are emitted in the order of the transitions they
/// describe. No order is guaranteed across servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SupervisorEvent {
    /// A server connected.
    ServerStarted {
        /// Server identifier.
        server_id: McpServerId,
    },
    /// A server was stopped.
    ServerStopped {
        /// Server identifier.
        server_id: McpServerId,
    },
    /// A start call or health check failed.
    ServerFailed {
        /// Server identifier.
        server_id: McpServerId,
        /// Failure message.
        error: String,
    },
    /// A transient failure is being retried after a delay.
    ServerRetry {
        /// Server identifier.
        server_id: McpServerId,
        /// Failed attempts so far.
        attempt: u32,
        /// Delay before the next attempt.
        next_retry_in: Duration,
        /// Failure message.
        error: String,
    },
    /// The server reached its failure threshold and was disabled.
    ServerAutoDisabled {
        /// Server identifier.
        server_id: McpServerId,
    },
}

impl SupervisorEvent {
    /// Returns the event name, for example `server-auto-disabled`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ServerStarted { .. } => "server-started",
            Self::ServerStopped { .. } => "server-stopped",
            Self::ServerFailed { .. } => "server-failed",
            Self::ServerRetry { .. } => "server-retry",
            Self::ServerAutoDisabled { .. } => "server-auto-disabled",
        }
    }

    /// Returns the server the event concerns.
    #[must_use]
    pub const fn server_id(&self) -> &McpServerId {
        match self {
            Self::ServerStarted { server_id }
            | Self::ServerStopped { server_id }
            | Self::ServerFailed { server_id, .. }
            | Self::ServerRetry { server_id, .. }
            | Self::ServerAutoDisabled { server_id } => server_id,
        }
    }
}
