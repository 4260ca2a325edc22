//! Port contracts for reaching MCP servers.

mod transport;

#[cfg(test)]
pub use transport::MockMcpTransportClient;
pub use transport::{McpTransportClient, TransportError, TransportResult};
