//! Supervisor interaction with the transport port, verified with mocks.

use super::{server_config, server_id, settings};
use crate::tool_registry::{
    domain::{McpConnectionState, McpToolDefinition},
    ports::{MockMcpTransportClient, TransportError},
    services::{McpServerSupervisor, McpSupervisorError},
};
use mockable::DefaultClock;
use rstest::rstest;
use serde_json::json;
use std::sync::Arc;

#[rstest]
#[tokio::test(start_paused = true)]
async fn permanent_connect_error_is_attempted_once() {
    let mut transport = MockMcpTransportClient::new();
    transport
        .expect_connect()
        .times(1)
        .returning(|_| Err(TransportError::new("Invalid credentials")));
    let supervisor = McpServerSupervisor::new(Arc::new(transport), Arc::new(DefaultClock), settings(3));
    supervisor
        .initialize(vec![server_config("alpha").with_enabled(false)])
        .await
        .expect("initialize");
    supervisor
        .reenable_server(&server_id("alpha"))
        .await
        .expect_err("start should fail");

    let record = supervisor.server(&server_id("alpha")).expect("record");

    assert_eq!(record.connection_state(), McpConnectionState::Failed);
    assert_eq!(record.failure_count(), 1);
    assert_eq!(record.retry_state().current_attempt(), 1);
    assert_eq!(record.retry_state().last_error(), Some("Invalid credentials"));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn list_tools_is_forwarded_for_live_servers() {
    let mut transport = MockMcpTransportClient::new();
    transport.expect_connect().times(1).returning(|_| Ok(()));
    transport
        .expect_list_tools()
        .withf(|id| id.as_str() == "alpha")
        .times(1)
        .returning(|_| {
            Ok(vec![
                McpToolDefinition::new("search", json!({"type": "object"}))
                    .expect("valid tool"),
            ])
        });
    let supervisor = McpServerSupervisor::new(Arc::new(transport), Arc::new(DefaultClock), settings(3));
    supervisor
        .initialize(vec![server_config("alpha")])
        .await
        .expect("initialize");

    let tools = supervisor
        .list_tools(&server_id("alpha"))
        .await
        .expect("tools");

    assert_eq!(tools.len(), 1);
    assert!(tools.iter().all(|tool| tool.name() == "search"));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn transport_errors_on_calls_are_wrapped_without_reconnecting() {
    let mut transport = MockMcpTransportClient::new();
    transport.expect_connect().times(1).returning(|_| Ok(()));
    transport
        .expect_call_tool()
        .times(1)
        .returning(|_, _, _| Err(TransportError::with_code("EPIPE", "broken pipe")));
    let supervisor = McpServerSupervisor::new(Arc::new(transport), Arc::new(DefaultClock), settings(3));
    supervisor
        .initialize(vec![server_config("alpha")])
        .await
        .expect("initialize");

    let result = supervisor
        .call_tool(&server_id("alpha"), "search", &json!({}))
        .await;

    assert!(matches!(
        result,
        Err(McpSupervisorError::Transport {
            operation: "call_tool",
            ref source,
            ..
        }) if source.code() == Some("EPIPE")
    ));
}
