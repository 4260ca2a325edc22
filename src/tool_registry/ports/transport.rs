//! Transport port used by the supervisor to drive MCP servers.

use crate::backoff::RetryableError;
use crate::tool_registry::domain::{McpServerConfig, McpServerId, McpToolDefinition};
use async_trait::async_trait;
use serde_json::Value;
use std::io;
use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Process or network layer that reaches MCP servers.
///
/// Implementations own the actual connections. Every failure is reported as
/// a [`TransportError`] which the backoff engine classifies as transient or
/// permanent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait McpTransportClient: Send + Sync {
    /// Establishes a connection described by `server`.
    async fn connect(&self, server: &McpServerConfig) -> TransportResult<()>;

    /// Tears down the connection to a server.
    async fn disconnect(&self, server_id: &McpServerId) -> TransportResult<()>;

    /// Lists tools exposed by a connected server.
    async fn list_tools(&self, server_id: &McpServerId) -> TransportResult<Vec<McpToolDefinition>>;

    /// Invokes a tool on a connected server.
    async fn call_tool(
        &self,
        server_id: &McpServerId,
        tool_name: &str,
        arguments: &Value,
    ) -> TransportResult<Value>;

    /// Best-effort liveness probe of a connected server.
    async fn health_probe(&self, server_id: &McpServerId) -> TransportResult<()>;
}

/// Failure reported by a transport adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    code: Option<String>,
    message: String,
}

impl TransportError {
    /// Creates an error without a code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Creates an error carrying a machine-readable code such as
    /// `ECONNREFUSED`.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl RetryableError for TransportError {
    fn error_code(&self) -> Option<&str> {
        self.code()
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        let message = err.to_string();
        match err.error_code() {
            Some(code) => Self::with_code(code, message),
            None => Self::new(message),
        }
    }
}
