//! Supervisor tests against in-memory and mocked transports.

mod mock_transport_tests;

use crate::backoff::RetryPolicy;
use crate::tool_registry::{
    domain::{McpServerConfig, McpServerId, McpServerName, McpTransport, SupervisorEvent},
    ports::TransportError,
    services::SupervisorSettings,
};
use std::time::Duration;
use tokio::sync::broadcast;

fn server_id(value: &str) -> McpServerId {
    McpServerId::new(value).expect("valid server id")
}

fn server_config(id: &str) -> McpServerConfig {
    McpServerConfig::new(
        server_id(id),
        McpServerName::new(format!("{id} server")).expect("valid server name"),
        McpTransport::stdio("mcp-server").expect("valid transport"),
    )
}

/// Two attempts per start, 100ms then 200ms, no jitter.
fn settings(failure_threshold: u32) -> SupervisorSettings {
    let policy = RetryPolicy::new(2, Duration::from_millis(100), Duration::from_secs(1))
        .expect("valid policy")
        .with_jitter(false);
    SupervisorSettings::new(failure_threshold, Duration::from_secs(30), policy)
        .expect("valid settings")
}

fn refused() -> TransportError {
    TransportError::with_code("ECONNREFUSED", "connection refused")
}

fn drain(receiver: &mut broadcast::Receiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn event_names(events: &[SupervisorEvent]) -> Vec<&'static str> {
    events.iter().map(SupervisorEvent::name).collect()
}
