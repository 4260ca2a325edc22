//! Cache-aware tool invocation with in-flight deduplication.

use super::{ToolResultCache, cache_key};
use crate::document_cache;
use crate::tool_registry::{
    domain::McpServerId,
    ports::McpTransportClient,
    services::{McpServerSupervisor, McpSupervisorError},
};
use mockable::Clock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where an invocation result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    /// A block already written into the supplied document.
    Document,
    /// A fresh entry of the in-memory result cache.
    Memory,
    /// The tool was executed for this call.
    Executed,
    /// An identical call was already running and its outcome was shared.
    Shared,
}

/// Result of [`CachedToolInvoker::invoke`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// The tool output. Results recovered from a document are returned as
    /// their raw text.
    pub result: Value,
    /// Where the result came from.
    pub source: ResultSource,
}

/// A failed tool execution.
///
/// Concurrent callers sharing one execution receive clones of the same
/// error.
#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct ToolInvocationError(Arc<McpSupervisorError>);

impl ToolInvocationError {
    /// Returns the underlying supervisor error.
    #[must_use]
    pub fn supervisor_error(&self) -> &McpSupervisorError {
        &self.0
    }
}

type SharedOutcome = Result<Value, ToolInvocationError>;

/// Runs tools through the document cache, the result cache, and the
/// supervisor, in that order.
///
/// Identical calls issued while one is executing wait for that execution
/// instead of starting another. Successful results are stored in the result
/// cache; failures are not.
pub struct CachedToolInvoker<T, C>
where
    T: McpTransportClient + 'static,
    C: Clock + Send + Sync + 'static,
{
    supervisor: McpServerSupervisor<T, C>,
    cache: Arc<ToolResultCache<C>>,
    pending: Mutex<HashMap<String, Arc<OnceCell<SharedOutcome>>>>,
}

impl<T, C> CachedToolInvoker<T, C>
where
    T: McpTransportClient + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates an invoker.
    #[must_use]
    pub fn new(supervisor: McpServerSupervisor<T, C>, cache: Arc<ToolResultCache<C>>) -> Self {
        Self {
            supervisor,
            cache,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the result cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<ToolResultCache<C>> {
        &self.cache
    }

    /// Returns a result for the call, executing the tool only when neither
    /// `document` nor the result cache holds one.
    ///
    /// # Errors
    ///
    /// Returns [`ToolInvocationError`] when the tool had to be executed and
    /// the supervisor reported a failure.
    pub async fn invoke(
        &self,
        document: Option<&str>,
        server_id: &McpServerId,
        tool_name: &str,
        parameters: &Value,
    ) -> Result<ToolInvocation, ToolInvocationError> {
        self.invoke_with_cancellation(
            document,
            server_id,
            tool_name,
            parameters,
            &CancellationToken::new(),
        )
        .await
    }

    /// Like [`Self::invoke`], returning [`McpSupervisorError::Cancelled`]
    /// once `cancel` fires.
    ///
    /// Cancellation only affects this caller. When the cancelled caller was
    /// the one executing the tool, a caller still waiting on the same call
    /// takes the execution over.
    ///
    /// # Errors
    ///
    /// See [`Self::invoke`].
    pub async fn invoke_with_cancellation(
        &self,
        document: Option<&str>,
        server_id: &McpServerId,
        tool_name: &str,
        parameters: &Value,
        cancel: &CancellationToken,
    ) -> Result<ToolInvocation, ToolInvocationError> {
        let recorded = document.and_then(|text| {
            document_cache::find_existing_result(text, server_id.as_str(), tool_name, parameters)
        });
        if let Some(record) = recorded {
            debug!(server_id = %server_id, tool = tool_name, "tool result found in document");
            return Ok(ToolInvocation {
                result: Value::String(record.result_markdown),
                source: ResultSource::Document,
            });
        }

        // The cache is consulted under the pending lock: an execution stores
        // its result before it leaves the pending map, so a miss here means
        // the call is either pending or has not started.
        let key = cache_key(server_id.as_str(), tool_name, parameters);
        let cell = {
            let mut pending = self.lock_pending();
            if let Some(cached) = self.cache.get(server_id.as_str(), tool_name, parameters) {
                return Ok(ToolInvocation {
                    result: cached.result,
                    source: ResultSource::Memory,
                });
            }
            Arc::clone(
                pending
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let mut executed = false;
        let executed_flag = &mut executed;
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ToolInvocationError(Arc::new(
                McpSupervisorError::Cancelled(server_id.clone()),
            ))),
            shared = cell.get_or_init(|| async move {
                *executed_flag = true;
                self.execute(server_id, tool_name, parameters).await
            }) => shared.clone(),
        };
        self.release_pending(&key, &cell);

        let source = if executed {
            ResultSource::Executed
        } else {
            ResultSource::Shared
        };
        outcome.map(|result| ToolInvocation { result, source })
    }

    async fn execute(
        &self,
        server_id: &McpServerId,
        tool_name: &str,
        parameters: &Value,
    ) -> SharedOutcome {
        debug!(server_id = %server_id, tool = tool_name, "executing tool");
        let result = self
            .supervisor
            .call_tool(server_id, tool_name, parameters)
            .await
            .map_err(|error| ToolInvocationError(Arc::new(error)))?;
        self.cache
            .set(server_id.as_str(), tool_name, parameters, result.clone());
        Ok(result)
    }

    /// Drops the pending entry once its outcome is known or no caller is
    /// left waiting on it.
    fn release_pending(&self, key: &str, cell: &Arc<OnceCell<SharedOutcome>>) {
        let mut pending = self.lock_pending();
        let owned = pending
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, cell));
        // One reference is held by the map and one by this caller.
        if owned && (cell.initialized() || Arc::strong_count(cell) <= 2) {
            pending.remove(key);
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, Arc<OnceCell<SharedOutcome>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
