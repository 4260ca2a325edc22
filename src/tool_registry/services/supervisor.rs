//! Connection supervisor for MCP servers.

use super::SupervisorSettings;
use crate::backoff::{RetryError, RetryNotice, with_retry};
use crate::tool_registry::{
    domain::{
        McpConnectionState, McpServerConfig, McpServerId, McpServerRecord, McpToolDefinition,
        ServerHealth, SupervisorEvent, ToolRegistryDomainError,
    },
    ports::{McpTransportClient, TransportError},
};
use mockable::Clock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors returned by [`McpServerSupervisor`].
#[derive(Debug, Error)]
pub enum McpSupervisorError {
    /// Domain validation or a state transition failed.
    #[error(transparent)]
    Domain(#[from] ToolRegistryDomainError),

    /// No server is registered under the identifier.
    #[error("MCP server {0} not found")]
    NotFound(McpServerId),

    /// A server with the identifier is already registered.
    #[error("MCP server {0} is already registered")]
    DuplicateServer(McpServerId),

    /// A start call failed after its retries.
    #[error("failed to start MCP server {server_id} after {attempts} attempt(s): {source}")]
    StartFailed {
        /// Server identifier.
        server_id: McpServerId,
        /// Connection attempts made by the call.
        attempts: u32,
        /// Last transport error.
        source: TransportError,
    },

    /// A transport operation against a live server failed.
    #[error("{operation} failed for MCP server {server_id}: {source}")]
    Transport {
        /// Server identifier.
        server_id: McpServerId,
        /// Operation name.
        operation: &'static str,
        /// Transport error.
        source: TransportError,
    },

    /// The operation was cancelled before it completed.
    #[error("operation on MCP server {0} was cancelled")]
    Cancelled(McpServerId),

    /// The supervisor has been shut down.
    #[error("MCP server supervisor has been shut down")]
    ShutDown,

    /// The shared server table lock was poisoned.
    #[error("supervisor state lock poisoned: {0}")]
    StatePoisoned(String),
}

/// Result type for supervisor operations.
pub type McpSupervisorResult<T> = Result<T, McpSupervisorError>;

pub(super) struct ServerSlot {
    pub(super) record: McpServerRecord,
    pub(super) task: Option<SlotTask>,
}

/// Connection work in progress for one server. `generation` tells a
/// finishing task whether it still owns the slot.
pub(super) struct SlotTask {
    pub(super) generation: u64,
    pub(super) token: CancellationToken,
}

#[derive(Default)]
pub(super) struct ServerTable {
    pub(super) servers: HashMap<McpServerId, ServerSlot>,
    pub(super) order: Vec<McpServerId>,
    next_generation: u64,
}

impl ServerTable {
    pub(super) fn slot_mut(&mut self, server_id: &McpServerId) -> McpSupervisorResult<&mut ServerSlot> {
        self.servers
            .get_mut(server_id)
            .ok_or_else(|| McpSupervisorError::NotFound(server_id.clone()))
    }

    fn slot(&self, server_id: &McpServerId) -> McpSupervisorResult<&ServerSlot> {
        self.servers
            .get(server_id)
            .ok_or_else(|| McpSupervisorError::NotFound(server_id.clone()))
    }

    /// Registers a task for `server_id`, cancelling any earlier one.
    pub(super) fn claim(
        &mut self,
        server_id: &McpServerId,
        token: CancellationToken,
    ) -> McpSupervisorResult<u64> {
        self.next_generation = self.next_generation.wrapping_add(1);
        let generation = self.next_generation;
        let slot = self.slot_mut(server_id)?;
        if let Some(previous) = slot.task.replace(SlotTask {
            generation,
            token,
        }) {
            previous.token.cancel();
        }
        Ok(generation)
    }

    fn records(&self) -> impl Iterator<Item = &McpServerRecord> {
        self.order
            .iter()
            .filter_map(|id| self.servers.get(id))
            .map(|slot| &slot.record)
    }
}

impl ServerSlot {
    /// Releases the task slot if `generation` still owns it.
    pub(super) fn release(&mut self, generation: u64) -> bool {
        let owned = self
            .task
            .as_ref()
            .is_some_and(|task| task.generation == generation);
        if owned {
            self.task = None;
        }
        owned
    }
}

/// Supervises connections to a set of MCP servers.
///
/// Start calls retry transient failures with the configured backoff policy.
/// Servers whose start calls keep failing are auto-disabled once they reach
/// the failure threshold. Tool reads fail fast and never reconnect.
pub struct McpServerSupervisor<T, C>
where
    T: McpTransportClient + 'static,
    C: Clock + Send + Sync + 'static,
{
    pub(super) transport: Arc<T>,
    pub(super) clock: Arc<C>,
    pub(super) settings: Arc<SupervisorSettings>,
    pub(super) table: Arc<RwLock<ServerTable>>,
    events: broadcast::Sender<SupervisorEvent>,
    pub(super) shutdown: CancellationToken,
}

impl<T, C> Clone for McpServerSupervisor<T, C>
where
    T: McpTransportClient + 'static,
    C: Clock + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            clock: Arc::clone(&self.clock),
            settings: Arc::clone(&self.settings),
            table: Arc::clone(&self.table),
            events: self.events.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<T, C> McpServerSupervisor<T, C>
where
    T: McpTransportClient + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a supervisor with no registered servers.
    #[must_use]
    pub fn new(transport: Arc<T>, clock: Arc<C>, settings: SupervisorSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            clock,
            settings: Arc::new(settings),
            table: Arc::new(RwLock::new(ServerTable::default())),
            events,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the supervisor settings.
    #[must_use]
    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Subscribes to supervisor events.
    ///
    /// Receivers only observe events emitted after they subscribe.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Registers `configs` and starts every enabled server concurrently.
    ///
    /// Start failures are recorded on the affected records and do not fail
    /// the call. Returns a health snapshot of every registered server.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::DuplicateServer`] when an identifier is
    /// repeated or already registered, [`McpSupervisorError::Domain`] when a
    /// transport descriptor is invalid, and [`McpSupervisorError::ShutDown`]
    /// after [`Self::shutdown`]. Nothing is registered on error.
    pub async fn initialize(
        &self,
        configs: Vec<McpServerConfig>,
    ) -> McpSupervisorResult<Vec<ServerHealth>> {
        let to_start = self.register_all(configs)?;
        info!(servers = to_start.len(), "starting enabled MCP servers");

        let mut starts = JoinSet::new();
        for server_id in to_start {
            let supervisor = self.clone();
            starts.spawn(async move {
                let outcome = supervisor.start_server(&server_id).await;
                (server_id, outcome)
            });
        }

        while let Some(joined) = starts.join_next().await {
            match joined {
                Ok((server_id, Err(error))) => {
                    warn!(server_id = %server_id, error = %error, "MCP server did not start");
                }
                Ok((_, Ok(_))) => {}
                Err(error) => warn!(error = %error, "MCP server start task aborted"),
            }
        }

        self.get_health_status()
    }

    fn register_all(&self, configs: Vec<McpServerConfig>) -> McpSupervisorResult<Vec<McpServerId>> {
        if self.shutdown.is_cancelled() {
            return Err(McpSupervisorError::ShutDown);
        }

        let mut table = self.write_table()?;
        let mut seen = HashSet::new();
        for config in &configs {
            config.transport.validate()?;
            if table.servers.contains_key(&config.id) || !seen.insert(config.id.clone()) {
                return Err(McpSupervisorError::DuplicateServer(config.id.clone()));
            }
        }

        let mut to_start = Vec::new();
        for config in configs {
            let server_id = config.id.clone();
            if config.enabled {
                to_start.push(server_id.clone());
            }
            table.order.push(server_id.clone());
            table.servers.insert(
                server_id,
                ServerSlot {
                    record: McpServerRecord::new(config),
                    task: None,
                },
            );
        }
        Ok(to_start)
    }

    /// Starts a registered server, retrying transient failures.
    ///
    /// # Errors
    ///
    /// See [`Self::start_server_with_cancellation`].
    pub async fn start_server(&self, server_id: &McpServerId) -> McpSupervisorResult<ServerHealth> {
        self.start_server_with_cancellation(server_id, &CancellationToken::new())
            .await
    }

    /// Starts a registered server, aborting when `cancel` fires.
    ///
    /// A start that fails after its retries counts towards the failure
    /// threshold. A cancelled start does not.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::StartFailed`] when the connection could
    /// not be established, [`McpSupervisorError::Cancelled`] when `cancel`
    /// fired or the server was stopped meanwhile,
    /// [`McpSupervisorError::Domain`] when the server is disabled or already
    /// starting, and [`McpSupervisorError::ShutDown`] after shutdown.
    pub async fn start_server_with_cancellation(
        &self,
        server_id: &McpServerId,
        cancel: &CancellationToken,
    ) -> McpSupervisorResult<ServerHealth> {
        let token = cancel.child_token();
        let (config, generation) = self.begin_start(server_id, &token)?;
        info!(server_id = %server_id, "starting MCP server");

        let outcome = with_retry(
            self.settings.retry_policy(),
            &*self.clock,
            &token,
            || self.transport.connect(&config),
            |notice| self.note_start_retry(server_id, &notice),
        )
        .await;

        let connected = outcome.is_ok();
        let result = self.finish_start(server_id, generation, outcome);
        if connected && matches!(result, Err(McpSupervisorError::Cancelled(_))) {
            self.disconnect_quietly(server_id).await;
        }
        result
    }

    fn begin_start(
        &self,
        server_id: &McpServerId,
        token: &CancellationToken,
    ) -> McpSupervisorResult<(McpServerConfig, u64)> {
        if self.shutdown.is_cancelled() {
            return Err(McpSupervisorError::ShutDown);
        }

        let mut table = self.write_table()?;
        let slot = table.slot_mut(server_id)?;
        slot.record.begin_start()?;
        let config = slot.record.config().clone();
        let generation = table.claim(server_id, token.clone())?;
        Ok((config, generation))
    }

    fn note_start_retry(&self, server_id: &McpServerId, notice: &RetryNotice<'_, TransportError>) {
        warn!(
            server_id = %server_id,
            attempt = notice.attempt,
            delay_ms = u64::try_from(notice.delay.as_millis()).unwrap_or(u64::MAX),
            error = %notice.error,
            "MCP server connection failed, retrying"
        );
        let recorded = self.update_slot(server_id, |slot| {
            slot.record.mark_retrying(notice.state.clone())?;
            self.emit(SupervisorEvent::ServerRetry {
                server_id: server_id.clone(),
                attempt: notice.attempt,
                next_retry_in: notice.delay,
                error: notice.error.to_string(),
            });
            Ok(())
        });
        if let Err(error) = recorded {
            debug!(server_id = %server_id, error = %error, "retry not recorded");
        }
    }

    fn finish_start(
        &self,
        server_id: &McpServerId,
        generation: u64,
        outcome: Result<(), RetryError<TransportError>>,
    ) -> McpSupervisorResult<ServerHealth> {
        self.update_slot(server_id, |slot| {
            if !slot.release(generation) || !slot.record.connection_state().is_starting() {
                return Err(McpSupervisorError::Cancelled(server_id.clone()));
            }

            match outcome {
                Ok(()) => {
                    slot.record.mark_connected()?;
                    info!(server_id = %server_id, "MCP server connected");
                    self.emit(SupervisorEvent::ServerStarted {
                        server_id: server_id.clone(),
                    });
                    Ok(slot.record.health())
                }
                Err(RetryError::Exhausted { source, state }) => {
                    let attempts = state.current_attempt();
                    let auto_disabled = slot
                        .record
                        .record_start_failure(state, self.settings.failure_threshold())?;
                    warn!(
                        server_id = %server_id,
                        attempts,
                        failure_count = slot.record.failure_count(),
                        error = %source,
                        "MCP server failed to start"
                    );
                    self.emit(SupervisorEvent::ServerFailed {
                        server_id: server_id.clone(),
                        error: source.to_string(),
                    });
                    if auto_disabled {
                        info!(server_id = %server_id, "MCP server auto-disabled");
                        self.emit(SupervisorEvent::ServerAutoDisabled {
                            server_id: server_id.clone(),
                        });
                    }
                    Err(McpSupervisorError::StartFailed {
                        server_id: server_id.clone(),
                        attempts,
                        source,
                    })
                }
                Err(RetryError::Cancelled { attempts }) => {
                    slot.record.mark_start_cancelled();
                    debug!(server_id = %server_id, attempts, "MCP server start cancelled");
                    Err(McpSupervisorError::Cancelled(server_id.clone()))
                }
            }
        })
    }

    /// Stops a server, cancelling any start or reconnect in progress.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::NotFound`] for unknown servers.
    pub async fn stop_server(&self, server_id: &McpServerId) -> McpSupervisorResult<ServerHealth> {
        let (health, had_connection) = self.update_slot(server_id, |slot| {
            Ok(self.stop_slot(server_id, slot))
        })?;
        if had_connection {
            self.disconnect_quietly(server_id).await;
        }
        Ok(health)
    }

    fn stop_slot(&self, server_id: &McpServerId, slot: &mut ServerSlot) -> (ServerHealth, bool) {
        if let Some(task) = slot.task.take() {
            task.token.cancel();
        }
        let state = slot.record.connection_state();
        let had_connection = state.is_live() || state == McpConnectionState::Error;
        slot.record.mark_stopped();
        info!(server_id = %server_id, "MCP server stopped");
        self.emit(SupervisorEvent::ServerStopped {
            server_id: server_id.clone(),
        });
        (slot.record.health(), had_connection)
    }

    /// Clears the auto-disable override and failure counters, then starts
    /// the server.
    ///
    /// An already connected server is only re-enabled.
    ///
    /// # Errors
    ///
    /// See [`Self::start_server`].
    pub async fn reenable_server(&self, server_id: &McpServerId) -> McpSupervisorResult<ServerHealth> {
        let connected = self.update_slot(server_id, |slot| {
            slot.record.reenable();
            Ok(slot.record.connection_state().is_live())
        })?;
        info!(server_id = %server_id, "MCP server re-enabled");
        if connected {
            return self.get_server_health(server_id);
        }
        self.start_server(server_id).await
    }

    /// Disables a server at the user's request and stops it.
    ///
    /// Unlike auto-disable this does not set the override flag.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::NotFound`] for unknown servers.
    pub async fn disable_server(&self, server_id: &McpServerId) -> McpSupervisorResult<ServerHealth> {
        self.update_slot(server_id, |slot| {
            slot.record.disable();
            Ok(())
        })?;
        self.stop_server(server_id).await
    }

    /// Lists tools exposed by a live server.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::Domain`] with
    /// [`ToolRegistryDomainError::ServerDisabled`] or
    /// [`ToolRegistryDomainError::ServerNotConnected`] without contacting
    /// the server, and [`McpSupervisorError::Transport`] when the call fails.
    pub async fn list_tools(
        &self,
        server_id: &McpServerId,
    ) -> McpSupervisorResult<Vec<McpToolDefinition>> {
        self.ensure_live(server_id)?;
        self.transport
            .list_tools(server_id)
            .await
            .map_err(|source| McpSupervisorError::Transport {
                server_id: server_id.clone(),
                operation: "list_tools",
                source,
            })
    }

    /// Invokes a tool on a live server.
    ///
    /// # Errors
    ///
    /// See [`Self::call_tool_with_cancellation`].
    pub async fn call_tool(
        &self,
        server_id: &McpServerId,
        tool_name: &str,
        arguments: &Value,
    ) -> McpSupervisorResult<Value> {
        self.call_tool_with_cancellation(server_id, tool_name, arguments, &CancellationToken::new())
            .await
    }

    /// Invokes a tool on a live server, abandoning the call when `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::Domain`] when the server is disabled or
    /// not connected, [`McpSupervisorError::Cancelled`] on cancellation, and
    /// [`McpSupervisorError::Transport`] when the call fails.
    pub async fn call_tool_with_cancellation(
        &self,
        server_id: &McpServerId,
        tool_name: &str,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> McpSupervisorResult<Value> {
        self.ensure_live(server_id)?;
        debug!(server_id = %server_id, tool = tool_name, "calling MCP tool");
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(McpSupervisorError::Cancelled(server_id.clone())),
            outcome = self.transport.call_tool(server_id, tool_name, arguments) => {
                outcome.map_err(|source| McpSupervisorError::Transport {
                    server_id: server_id.clone(),
                    operation: "call_tool",
                    source,
                })
            }
        }
    }

    /// Returns every registered server in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::StatePoisoned`] if the state lock is
    /// poisoned.
    pub fn list_servers(&self) -> McpSupervisorResult<Vec<McpServerRecord>> {
        Ok(self.read_table()?.records().cloned().collect())
    }

    /// Returns the record of one server.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::NotFound`] for unknown servers.
    pub fn server(&self, server_id: &McpServerId) -> McpSupervisorResult<McpServerRecord> {
        Ok(self.read_table()?.slot(server_id)?.record.clone())
    }

    /// Returns the health snapshot of one server.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::NotFound`] for unknown servers.
    pub fn get_server_health(&self, server_id: &McpServerId) -> McpSupervisorResult<ServerHealth> {
        Ok(self.read_table()?.slot(server_id)?.record.health())
    }

    /// Returns a health snapshot of every server in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::StatePoisoned`] if the state lock is
    /// poisoned.
    pub fn get_health_status(&self) -> McpSupervisorResult<Vec<ServerHealth>> {
        Ok(self
            .read_table()?
            .records()
            .map(McpServerRecord::health)
            .collect())
    }

    /// Stops every server and refuses further starts.
    ///
    /// Running starts, reconnects and the health monitor are cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::StatePoisoned`] if the state lock is
    /// poisoned.
    pub async fn shutdown(&self) -> McpSupervisorResult<()> {
        self.shutdown.cancel();
        let to_disconnect = {
            let mut table = self.write_table()?;
            let ids = table.order.clone();
            let mut connected = Vec::new();
            for server_id in ids {
                let slot = table.slot_mut(&server_id)?;
                if slot.record.connection_state() == McpConnectionState::Stopped {
                    continue;
                }
                let (_, had_connection) = self.stop_slot(&server_id, slot);
                if had_connection {
                    connected.push(server_id);
                }
            }
            connected
        };

        for server_id in &to_disconnect {
            self.disconnect_quietly(server_id).await;
        }
        info!("MCP server supervisor shut down");
        Ok(())
    }

    /// Returns whether [`Self::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn ensure_live(&self, server_id: &McpServerId) -> McpSupervisorResult<()> {
        let table = self.read_table()?;
        table.slot(server_id)?.record.ensure_live()?;
        Ok(())
    }

    pub(super) async fn disconnect_quietly(&self, server_id: &McpServerId) {
        if let Err(error) = self.transport.disconnect(server_id).await {
            debug!(server_id = %server_id, error = %error, "disconnect failed");
        }
    }

    pub(super) fn emit(&self, event: SupervisorEvent) {
        let name = event.name();
        if self.events.send(event).is_err() {
            trace!(event = name, "no supervisor event subscribers");
        }
    }

    pub(super) fn update_slot<R>(
        &self,
        server_id: &McpServerId,
        apply: impl FnOnce(&mut ServerSlot) -> McpSupervisorResult<R>,
    ) -> McpSupervisorResult<R> {
        let mut table = self.write_table()?;
        apply(table.slot_mut(server_id)?)
    }

    pub(super) fn write_table(&self) -> McpSupervisorResult<RwLockWriteGuard<'_, ServerTable>> {
        self.table
            .write()
            .map_err(|err| McpSupervisorError::StatePoisoned(err.to_string()))
    }

    fn read_table(&self) -> McpSupervisorResult<RwLockReadGuard<'_, ServerTable>> {
        self.table
            .read()
            .map_err(|err| McpSupervisorError::StatePoisoned(err.to_string()))
    }
}
