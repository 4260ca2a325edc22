//! Error types for MCP server domain validation and state transitions.

use super::McpServerId;
use thiserror::Error;

/// Errors returned while constructing or transitioning tool registry values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolRegistryDomainError {
    /// The server identifier is empty after trimming.
    #[error("MCP server identifier must not be empty")]
    EmptyServerId,

    /// The server identifier contains whitespace or control characters.
    #[error("MCP server identifier '{0}' must not contain whitespace or control characters")]
    InvalidServerId(String),

    /// The server name is empty after trimming.
    #[error("MCP server name must not be empty")]
    EmptyServerName,

    /// The server name exceeds the 100-character limit.
    #[error("MCP server name exceeds 100 character limit: {0}")]
    ServerNameTooLong(String),

    /// The STDIO command is empty.
    #[error("STDIO command must not be empty")]
    EmptyStdioCommand,

    /// The HTTP endpoint URL is empty.
    #[error("HTTP endpoint URL must not be empty")]
    EmptyHttpUrl,

    /// The HTTP endpoint URL does not have an `http://` or `https://` prefix.
    #[error("HTTP endpoint URL '{0}' must start with 'http://' or 'https://'")]
    InvalidHttpUrl(String),

    /// A tool definition name is empty after trimming.
    #[error("tool name must not be empty")]
    EmptyToolName,

    /// Transitioning between two connection states is invalid.
    #[error("invalid MCP server connection transition for {server_id}: {from} -> {to}")]
    InvalidConnectionTransition {
        /// Server identifier.
        server_id: McpServerId,
        /// Current connection state.
        from: String,
        /// Requested target connection state.
        to: String,
    },

    /// The server is disabled by the user or by the auto-disable override.
    #[error("MCP server {server_id} is disabled (auto-disabled: {auto_disabled})")]
    ServerDisabled {
        /// Server identifier.
        server_id: McpServerId,
        /// Whether the supervisor disabled the server automatically.
        auto_disabled: bool,
    },

    /// Tool listing and invocation require a live connection.
    #[error("MCP server {server_id} has no live connection (current state: {state})")]
    ServerNotConnected {
        /// Server identifier.
        server_id: McpServerId,
        /// Connection state in canonical string form.
        state: String,
    },
}

/// Error returned while parsing a connection state from text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown MCP server connection state: {0}")]
pub struct ParseConnectionStateError(pub String);
