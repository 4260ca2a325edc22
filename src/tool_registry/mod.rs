//! MCP server connection supervision.
//!
//! The supervisor owns one record per configured server, drives connection
//! attempts through the [`crate::backoff`] engine, auto-disables servers
//! whose start calls keep failing, and exposes fail-fast tool access. The
//! module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
