//! Supervisor lifecycle through the public API.

use super::helpers::{TestContext, context, server_id, stdio_server};
use mcp_resilience::tool_registry::{
    domain::{McpConnectionState, McpToolDefinition, SupervisorEvent, ToolRegistryDomainError},
    ports::TransportError,
    services::McpSupervisorError,
};
use rstest::rstest;
use serde_json::json;

fn event_names(receiver: &mut tokio::sync::broadcast::Receiver<SupervisorEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        names.push(event.name());
    }
    names
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn startup_connects_servers_and_lists_their_tools(context: TestContext) {
    let tool = McpToolDefinition::new("search", json!({"type": "object"})).expect("valid tool");
    context
        .transport
        .set_tool_catalog(&server_id("search"), vec![tool])
        .expect("catalog");

    let health = context
        .supervisor
        .initialize(vec![stdio_server("search"), stdio_server("files").with_enabled(false)])
        .await
        .expect("initialize");

    let states: Vec<_> = health.iter().map(|entry| entry.connection_state).collect();
    assert_eq!(
        states,
        vec![McpConnectionState::Connected, McpConnectionState::Disconnected]
    );
    let tools = context
        .supervisor
        .list_tools(&server_id("search"))
        .await
        .expect("list tools");
    assert_eq!(tools.len(), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failing_server_is_auto_disabled_and_recovers_after_reenable(context: TestContext) {
    let id = server_id("flaky");
    context
        .transport
        .fail_connects(&id, TransportError::with_code("ECONNREFUSED", "connection refused"))
        .expect("script failures");
    let mut events = context.supervisor.subscribe();
    let health = context
        .supervisor
        .initialize(vec![stdio_server("flaky")])
        .await
        .expect("initialize");
    assert_eq!(health.first().map(|entry| entry.failure_count), Some(1));

    let second = context.supervisor.start_server(&id).await;
    assert!(matches!(second, Err(McpSupervisorError::StartFailed { attempts: 2, .. })));

    let record = context.supervisor.server(&id).expect("record");
    assert!(record.auto_disabled());
    assert!(!record.enabled());
    assert_eq!(
        event_names(&mut events).last().copied(),
        Some("server-auto-disabled")
    );
    let refused = context.supervisor.start_server(&id).await;
    assert!(matches!(
        refused,
        Err(McpSupervisorError::Domain(ToolRegistryDomainError::ServerDisabled {
            auto_disabled: true,
            ..
        }))
    ));

    context.transport.clear_connect_failures(&id).expect("clear failures");
    let restored = context.supervisor.reenable_server(&id).await.expect("reenable");

    assert_eq!(restored.connection_state, McpConnectionState::Connected);
    assert_eq!(restored.failure_count, 0);
    assert!(!restored.auto_disabled);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn shutdown_disconnects_and_rejects_further_work(context: TestContext) {
    context
        .supervisor
        .initialize(vec![stdio_server("search")])
        .await
        .expect("initialize");

    context.supervisor.shutdown().await.expect("shutdown");

    assert!(context.supervisor.is_shut_down());
    assert!(
        !context
            .transport
            .is_connected(&server_id("search"))
            .expect("query transport")
    );
    let restart = context.supervisor.start_server(&server_id("search")).await;
    assert!(matches!(restart, Err(McpSupervisorError::ShutDown)));
}
