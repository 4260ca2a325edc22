//! Shared fixtures for in-memory integration tests.

use mcp_resilience::backoff::RetryPolicy;
use mcp_resilience::tool_registry::{
    adapters::InMemoryMcpTransport,
    domain::{McpServerConfig, McpServerId, McpServerName, McpTransport},
    services::{McpServerSupervisor, SupervisorSettings},
};
use mockable::DefaultClock;
use rstest::fixture;
use std::sync::Arc;
use std::time::Duration;

/// Supervisor over the in-memory transport.
pub type TestSupervisor = McpServerSupervisor<InMemoryMcpTransport, DefaultClock>;

/// A supervisor together with the transport it drives.
pub struct TestContext {
    /// Scriptable transport.
    pub transport: Arc<InMemoryMcpTransport>,
    /// Supervisor under test.
    pub supervisor: TestSupervisor,
}

/// Provides a supervisor that disables a server after two failed starts,
/// each start making up to two attempts.
#[fixture]
pub fn context() -> TestContext {
    let transport = Arc::new(InMemoryMcpTransport::new());
    let policy = RetryPolicy::new(2, Duration::from_millis(50), Duration::from_millis(500))
        .expect("valid policy")
        .with_jitter(false);
    let settings =
        SupervisorSettings::new(2, Duration::from_secs(30), policy).expect("valid settings");
    let supervisor =
        McpServerSupervisor::new(Arc::clone(&transport), Arc::new(DefaultClock), settings);
    TestContext {
        transport,
        supervisor,
    }
}

/// Builds a validated server identifier.
pub fn server_id(value: &str) -> McpServerId {
    McpServerId::new(value).expect("valid server id")
}

/// Builds an enabled stdio server configuration.
pub fn stdio_server(id: &str) -> McpServerConfig {
    McpServerConfig::new(
        server_id(id),
        McpServerName::new(format!("{id} tools")).expect("valid server name"),
        McpTransport::stdio(format!("{id}-mcp")).expect("valid transport"),
    )
}
