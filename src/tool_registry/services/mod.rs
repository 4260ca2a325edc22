//! Supervision services for MCP server connections.

mod health;
mod settings;
mod supervisor;

pub use settings::{SupervisorSettings, SupervisorSettingsError};
pub use supervisor::{McpServerSupervisor, McpSupervisorError, McpSupervisorResult};
