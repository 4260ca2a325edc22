//! Domain model for supervised MCP tool servers.
//!
//! The domain models server identity and transport configuration, the
//! connection state machine layered with the auto-disable override, health
//! snapshots, supervisor events, and discovered tool metadata. Transport and
//! timing concerns remain outside this boundary.

mod error;
mod event;
mod health;
mod ids;
mod server;
mod tool;
mod transport;

pub use error::{ParseConnectionStateError, ToolRegistryDomainError};
pub use event::SupervisorEvent;
pub use health::ServerHealth;
pub use ids::{McpServerId, McpServerName};
pub use server::{McpConnectionState, McpServerConfig, McpServerRecord};
pub use tool::McpToolDefinition;
pub use transport::{HttpTransportConfig, McpTransport, StdioTransportConfig};
