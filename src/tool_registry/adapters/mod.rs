//! Adapter implementations for the MCP transport port.

mod runtime;

pub use runtime::InMemoryMcpTransport;
