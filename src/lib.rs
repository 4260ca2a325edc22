//! Resilience and caching for MCP tool servers.
//!
//! This crate keeps a set of Model Context Protocol servers connected,
//! retrying failed connections with exponential backoff and disabling
//! servers that keep failing, and avoids repeating tool calls whose results
//! are already known.
//!
//! # Architecture
//!
//! The server supervisor follows hexagonal architecture principles:
//!
//! - **Domain**: server records, connection states, and lifecycle events
//! - **Ports**: the [`tool_registry::ports::McpTransportClient`] trait
//! - **Adapters**: an in-memory transport for tests and local wiring
//!
//! # Modules
//!
//! - [`backoff`]: retry policy, error classification, and the retry driver
//! - [`tool_registry`]: server supervision with auto-disable and health checks
//! - [`tool_cache`]: TTL cache of tool results and cache-aware invocation
//! - [`document_cache`]: recovery of tool results recorded in markdown
//! - [`config`]: YAML configuration loading

pub mod backoff;
pub mod config;
pub mod document_cache;
pub mod tool_cache;
pub mod tool_registry;

#[cfg(test)]
mod test_support;
