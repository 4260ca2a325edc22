//! Health checking and health-triggered reconnection.

use super::supervisor::{McpServerSupervisor, McpSupervisorError, McpSupervisorResult};
use crate::backoff::{RetryError, with_retry};
use crate::tool_registry::{
    domain::{McpConnectionState, McpServerConfig, McpServerId, ServerHealth, SupervisorEvent},
    ports::{McpTransportClient, TransportError},
};
use mockable::Clock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl<T, C> McpServerSupervisor<T, C>
where
    T: McpTransportClient + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Probes a connected server and reconnects it when the probe fails.
    ///
    /// Servers that are not connected are left alone; a `failed` server has
    /// no connection to probe and recovers through an explicit start or
    /// re-enable. A failed probe moves the server to `error`, emits
    /// `server-failed`, and reconnects with the retry policy while tracking
    /// progress in the record's health retry state. Health failures never
    /// count towards the auto-disable threshold.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::Transport`] when the reconnect fails,
    /// [`McpSupervisorError::Cancelled`] when the server is stopped during
    /// the reconnect, and [`McpSupervisorError::NotFound`] for unknown
    /// servers.
    pub async fn check_health(&self, server_id: &McpServerId) -> McpSupervisorResult<ServerHealth> {
        let current = self.get_server_health(server_id)?;
        if current.connection_state != McpConnectionState::Connected {
            return Ok(current);
        }

        match self.transport.health_probe(server_id).await {
            Ok(()) => self.update_slot(server_id, |slot| {
                slot.record.record_health_check(self.clock.utc());
                Ok(slot.record.health())
            }),
            Err(error) => self.recover_unhealthy(server_id, &error).await,
        }
    }

    /// Runs [`Self::check_health`] for every connected server.
    ///
    /// Individual failures are logged and reflected in the returned
    /// snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`McpSupervisorError::StatePoisoned`] if the state lock is
    /// poisoned.
    pub async fn check_all_health(&self) -> McpSupervisorResult<Vec<ServerHealth>> {
        let connected: Vec<McpServerId> = self
            .get_health_status()?
            .into_iter()
            .filter(|health| health.connection_state == McpConnectionState::Connected)
            .map(|health| health.server_id)
            .collect();

        for server_id in &connected {
            if let Err(error) = self.check_health(server_id).await {
                warn!(server_id = %server_id, error = %error, "health check did not recover server");
            }
        }
        self.get_health_status()
    }

    /// Spawns a task that checks server health on the configured interval
    /// until the supervisor shuts down.
    #[must_use]
    pub fn spawn_health_monitor(&self) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.run_health_monitor().await })
    }

    async fn run_health_monitor(&self) {
        let period = self.settings.health_check_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX), "health monitor started");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _tick = ticker.tick() => {}
            }
            if let Err(error) = self.check_all_health().await {
                warn!(error = %error, "health monitor pass failed");
            }
        }
        debug!("health monitor stopped");
    }

    async fn recover_unhealthy(
        &self,
        server_id: &McpServerId,
        probe_error: &TransportError,
    ) -> McpSupervisorResult<ServerHealth> {
        let token = self.shutdown.child_token();
        let (config, generation) = self.begin_reconnect(server_id, probe_error, &token)?;

        let outcome = with_retry(
            self.settings.retry_policy(),
            &*self.clock,
            &token,
            || self.transport.connect(&config),
            |notice| {
                let noted = self.update_slot(server_id, |slot| {
                    slot.record.note_health_retry(notice.state.clone());
                    self.emit(SupervisorEvent::ServerRetry {
                        server_id: server_id.clone(),
                        attempt: notice.attempt,
                        next_retry_in: notice.delay,
                        error: notice.error.to_string(),
                    });
                    Ok(())
                });
                if let Err(error) = noted {
                    debug!(server_id = %server_id, error = %error, "reconnect retry not recorded");
                }
            },
        )
        .await;

        let connected = outcome.is_ok();
        let result = self.finish_reconnect(server_id, generation, outcome);
        if connected && matches!(result, Err(McpSupervisorError::Cancelled(_))) {
            self.disconnect_quietly(server_id).await;
        }
        result
    }

    fn begin_reconnect(
        &self,
        server_id: &McpServerId,
        probe_error: &TransportError,
        token: &CancellationToken,
    ) -> McpSupervisorResult<(McpServerConfig, u64)> {
        let mut table = self.write_table()?;
        let slot = table.slot_mut(server_id)?;
        slot.record.mark_unhealthy(self.clock.utc())?;
        warn!(server_id = %server_id, error = %probe_error, "MCP server health check failed");
        self.emit(SupervisorEvent::ServerFailed {
            server_id: server_id.clone(),
            error: probe_error.to_string(),
        });
        let config = slot.record.config().clone();
        let generation = table.claim(server_id, token.clone())?;
        Ok((config, generation))
    }

    fn finish_reconnect(
        &self,
        server_id: &McpServerId,
        generation: u64,
        outcome: Result<(), RetryError<TransportError>>,
    ) -> McpSupervisorResult<ServerHealth> {
        self.update_slot(server_id, |slot| {
            if !slot.release(generation)
                || slot.record.connection_state() != McpConnectionState::Error
            {
                return Err(McpSupervisorError::Cancelled(server_id.clone()));
            }

            match outcome {
                Ok(()) => {
                    slot.record.mark_reconnected()?;
                    info!(server_id = %server_id, "MCP server reconnected");
                    self.emit(SupervisorEvent::ServerStarted {
                        server_id: server_id.clone(),
                    });
                    Ok(slot.record.health())
                }
                Err(RetryError::Exhausted { source, state }) => {
                    slot.record.note_health_retry(state);
                    warn!(server_id = %server_id, error = %source, "MCP server reconnect failed");
                    self.emit(SupervisorEvent::ServerFailed {
                        server_id: server_id.clone(),
                        error: source.to_string(),
                    });
                    Err(McpSupervisorError::Transport {
                        server_id: server_id.clone(),
                        operation: "reconnect",
                        source,
                    })
                }
                Err(RetryError::Cancelled { .. }) => {
                    Err(McpSupervisorError::Cancelled(server_id.clone()))
                }
            }
        })
    }
}
