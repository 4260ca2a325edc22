//! In-memory transport adapter for supervisor tests and local flows.

use crate::tool_registry::{
    domain::{McpServerConfig, McpServerId, McpToolDefinition},
    ports::{McpTransportClient, TransportError, TransportResult},
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// In-memory MCP transport.
///
/// The adapter models connections without spawning processes. Failures can
/// be scripted per server: queued failures are consumed one per call, while
/// persistent failures apply until cleared. Tool calls echo their arguments
/// unless a canned response is registered.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMcpTransport {
    state: Arc<RwLock<InMemoryTransportState>>,
}

#[derive(Debug, Default)]
struct InMemoryTransportState {
    connected: HashSet<McpServerId>,
    connect_attempts: HashMap<McpServerId, u32>,
    queued_connect_failures: HashMap<McpServerId, VecDeque<TransportError>>,
    persistent_connect_failures: HashMap<McpServerId, TransportError>,
    probe_failures: HashMap<McpServerId, TransportError>,
    tool_catalogs: HashMap<McpServerId, Vec<McpToolDefinition>>,
    tool_responses: HashMap<(McpServerId, String), Value>,
    tool_calls: HashMap<(McpServerId, String), u32>,
    call_latency: Duration,
}

impl InMemoryMcpTransport {
    /// Creates a transport with no scripted behaviour.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues failures returned by the next connect attempts, in order.
    ///
    /// # Errors
    ///
    /// Returns a transport error when lock acquisition fails.
    pub fn queue_connect_failures(
        &self,
        server_id: &McpServerId,
        failures: impl IntoIterator<Item = TransportError>,
    ) -> TransportResult<()> {
        let mut state = self.write_state()?;
        state
            .queued_connect_failures
            .entry(server_id.clone())
            .or_default()
            .extend(failures);
        Ok(())
    }

    /// Makes every connect attempt fail until cleared.
    ///
    /// # Errors
    ///
    /// Returns a transport error when lock acquisition fails.
    pub fn fail_connects(
        &self,
        server_id: &McpServerId,
        failure: TransportError,
    ) -> TransportResult<()> {
        self.write_state()?
            .persistent_connect_failures
            .insert(server_id.clone(), failure);
        Ok(())
    }

    /// Removes every scripted connect failure for a server.
    ///
    /// # Errors
    ///
    /// Returns a transport error when lock acquisition fails.
    pub fn clear_connect_failures(&self, server_id: &McpServerId) -> TransportResult<()> {
        let mut state = self.write_state()?;
        state.persistent_connect_failures.remove(server_id);
        state.queued_connect_failures.remove(server_id);
        Ok(())
    }

    /// Makes health probes fail, or pass again with `None`.
    ///
    /// # Errors
    ///
    /// Returns a transport error when lock acquisition fails.
    pub fn set_probe_failure(
        &self,
        server_id: &McpServerId,
        failure: Option<TransportError>,
    ) -> TransportResult<()> {
        let mut state = self.write_state()?;
        match failure {
            Some(error) => state.probe_failures.insert(server_id.clone(), error),
            None => state.probe_failures.remove(server_id),
        };
        Ok(())
    }

    /// Associates a tool catalog with a server, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns a transport error when lock acquisition fails.
    pub fn set_tool_catalog(
        &self,
        server_id: &McpServerId,
        tools: Vec<McpToolDefinition>,
    ) -> TransportResult<()> {
        self.write_state()?
            .tool_catalogs
            .insert(server_id.clone(), tools);
        Ok(())
    }

    /// Registers a canned response for a tool.
    ///
    /// # Errors
    ///
    /// Returns a transport error when lock acquisition fails.
    pub fn set_tool_response(
        &self,
        server_id: &McpServerId,
        tool_name: &str,
        response: Value,
    ) -> TransportResult<()> {
        self.write_state()?
            .tool_responses
            .insert((server_id.clone(), tool_name.to_owned()), response);
        Ok(())
    }

    /// Delays every tool call by `latency`.
    ///
    /// # Errors
    ///
    /// Returns a transport error when lock acquisition fails.
    pub fn set_call_latency(&self, latency: Duration) -> TransportResult<()> {
        self.write_state()?.call_latency = latency;
        Ok(())
    }

    /// Returns how many connect attempts a server received.
    ///
    /// # Errors
    ///
    /// Returns a transport error when lock acquisition fails.
    pub fn connect_attempts(&self, server_id: &McpServerId) -> TransportResult<u32> {
        Ok(self
            .read_state()?
            .connect_attempts
            .get(server_id)
            .copied()
            .unwrap_or_default())
    }

    /// Returns how many times a tool was invoked.
    ///
    /// # Errors
    ///
    /// Returns a transport error when lock acquisition fails.
    pub fn tool_calls(&self, server_id: &McpServerId, tool_name: &str) -> TransportResult<u32> {
        Ok(self
            .read_state()?
            .tool_calls
            .get(&(server_id.clone(), tool_name.to_owned()))
            .copied()
            .unwrap_or_default())
    }

    /// Returns whether a server is currently connected.
    ///
    /// # Errors
    ///
    /// Returns a transport error when lock acquisition fails.
    pub fn is_connected(&self, server_id: &McpServerId) -> TransportResult<bool> {
        Ok(self.read_state()?.connected.contains(server_id))
    }

    fn read_state(&self) -> TransportResult<RwLockReadGuard<'_, InMemoryTransportState>> {
        self.state
            .read()
            .map_err(|err| TransportError::new(format!("transport state poisoned: {err}")))
    }

    fn write_state(&self) -> TransportResult<RwLockWriteGuard<'_, InMemoryTransportState>> {
        self.state
            .write()
            .map_err(|err| TransportError::new(format!("transport state poisoned: {err}")))
    }

    fn ensure_connected(
        state: &InMemoryTransportState,
        server_id: &McpServerId,
    ) -> TransportResult<()> {
        if state.connected.contains(server_id) {
            return Ok(());
        }
        Err(TransportError::with_code(
            "ENOTCONN",
            format!("server {server_id} is not connected"),
        ))
    }
}

#[async_trait]
impl McpTransportClient for InMemoryMcpTransport {
    async fn connect(&self, server: &McpServerConfig) -> TransportResult<()> {
        let mut state = self.write_state()?;
        let attempts = state.connect_attempts.entry(server.id.clone()).or_default();
        *attempts = attempts.saturating_add(1);

        let queued = state
            .queued_connect_failures
            .get_mut(&server.id)
            .and_then(VecDeque::pop_front);
        if let Some(failure) = queued {
            return Err(failure);
        }

        if let Some(failure) = state.persistent_connect_failures.get(&server.id) {
            return Err(failure.clone());
        }

        state.connected.insert(server.id.clone());
        state.probe_failures.remove(&server.id);
        Ok(())
    }

    async fn disconnect(&self, server_id: &McpServerId) -> TransportResult<()> {
        self.write_state()?.connected.remove(server_id);
        Ok(())
    }

    async fn list_tools(&self, server_id: &McpServerId) -> TransportResult<Vec<McpToolDefinition>> {
        let state = self.read_state()?;
        Self::ensure_connected(&state, server_id)?;
        Ok(state
            .tool_catalogs
            .get(server_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn call_tool(
        &self,
        server_id: &McpServerId,
        tool_name: &str,
        arguments: &Value,
    ) -> TransportResult<Value> {
        let latency = {
            let mut state = self.write_state()?;
            Self::ensure_connected(&state, server_id)?;
            let calls = state
                .tool_calls
                .entry((server_id.clone(), tool_name.to_owned()))
                .or_default();
            *calls = calls.saturating_add(1);
            state.call_latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.read_state()?;
        let canned = state
            .tool_responses
            .get(&(server_id.clone(), tool_name.to_owned()))
            .cloned();
        Ok(canned.unwrap_or_else(|| json!({ "tool": tool_name, "arguments": arguments })))
    }

    async fn health_probe(&self, server_id: &McpServerId) -> TransportResult<()> {
        let state = self.read_state()?;
        Self::ensure_connected(&state, server_id)?;
        match state.probe_failures.get(server_id) {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}
