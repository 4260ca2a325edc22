//! Document, memory, and in-flight reuse of tool results.

use crate::backoff::RetryPolicy;
use crate::test_support::ManualClock;
use crate::tool_cache::{CachedToolInvoker, ResultSource, ToolCacheSettings, ToolResultCache};
use crate::tool_registry::{
    adapters::InMemoryMcpTransport,
    domain::{McpServerConfig, McpServerId, McpServerName, McpTransport, ToolRegistryDomainError},
    services::{McpServerSupervisor, McpSupervisorError, SupervisorSettings},
};
use mockable::DefaultClock;
use rstest::{fixture, rstest};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

struct Harness {
    clock: Arc<ManualClock>,
    transport: Arc<InMemoryMcpTransport>,
    supervisor: McpServerSupervisor<InMemoryMcpTransport, ManualClock>,
    invoker: CachedToolInvoker<InMemoryMcpTransport, ManualClock>,
}

fn weather_id() -> McpServerId {
    McpServerId::new("weather").expect("valid id")
}

#[fixture]
fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new());
    let transport = Arc::new(InMemoryMcpTransport::new());
    let policy = RetryPolicy::new(1, Duration::from_millis(10), Duration::from_millis(10))
        .expect("valid policy");
    let supervisor = McpServerSupervisor::new(
        Arc::clone(&transport),
        Arc::clone(&clock),
        SupervisorSettings::new(3, Duration::from_secs(30), policy).expect("valid settings"),
    );
    let cache = Arc::new(ToolResultCache::new(
        Arc::clone(&clock),
        ToolCacheSettings::new(Duration::from_secs(60)),
    ));
    let invoker = CachedToolInvoker::new(supervisor.clone(), cache);
    Harness {
        clock,
        transport,
        supervisor,
        invoker,
    }
}

async fn connect(harness: &Harness, enabled: bool) {
    let config = McpServerConfig::new(
        weather_id(),
        McpServerName::new("Weather").expect("valid name"),
        McpTransport::http("https://weather.example/mcp").expect("valid transport"),
    )
    .with_enabled(enabled);
    harness
        .supervisor
        .initialize(vec![config])
        .await
        .expect("initialize");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn second_identical_call_is_served_from_memory(harness: Harness) {
    connect(&harness, true).await;
    let params = json!({"location": "Paris", "units": "metric"});

    let first = harness
        .invoker
        .invoke(None, &weather_id(), "get_forecast", &params)
        .await
        .expect("first call");
    let second = harness
        .invoker
        .invoke(
            None,
            &weather_id(),
            "get_forecast",
            &json!({"units": "metric", "location": "Paris"}),
        )
        .await
        .expect("second call");

    assert_eq!(first.source, ResultSource::Executed);
    assert_eq!(second.source, ResultSource::Memory);
    assert_eq!(first.result, second.result);
    assert_eq!(
        harness
            .transport
            .tool_calls(&weather_id(), "get_forecast")
            .expect("calls"),
        1
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn expired_memory_entry_is_executed_again(harness: Harness) {
    connect(&harness, true).await;
    let params = json!({"q": 1});
    let _first = harness
        .invoker
        .invoke(None, &weather_id(), "lookup", &params)
        .await
        .expect("first call");

    harness.clock.advance(Duration::from_secs(61));
    let again = harness
        .invoker
        .invoke(None, &weather_id(), "lookup", &params)
        .await
        .expect("second call");

    assert_eq!(again.source, ResultSource::Executed);
    assert_eq!(harness.invoker.cache().stats().misses, 2);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn document_result_wins_without_execution(harness: Harness) {
    connect(&harness, true).await;
    let document = "\
> [!tool] Weather: get_forecast
> Server ID: weather
> ```yaml
> tool: get_forecast
> units: metric
> location: Paris
> ```
> Result:
> ```
> Sunny
> ```";

    let outcome = harness
        .invoker
        .invoke(
            Some(document),
            &weather_id(),
            "get_forecast",
            &json!({"location": "Paris", "units": "metric"}),
        )
        .await
        .expect("document lookup");

    assert_eq!(outcome.source, ResultSource::Document);
    assert_eq!(outcome.result, json!("Sunny"));
    assert_eq!(
        harness
            .transport
            .tool_calls(&weather_id(), "get_forecast")
            .expect("calls"),
        0
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn concurrent_identical_calls_execute_once(harness: Harness) {
    connect(&harness, true).await;
    harness
        .transport
        .set_call_latency(Duration::from_millis(100))
        .expect("latency");
    let id = weather_id();
    let params = json!({"location": "Paris"});

    let (first, second) = tokio::join!(
        harness.invoker.invoke(None, &id, "get_forecast", &params),
        harness.invoker.invoke(None, &id, "get_forecast", &params),
    );

    let mut sources = vec![
        first.expect("first call").source,
        second.expect("second call").source,
    ];
    sources.sort_by_key(|source| *source == ResultSource::Shared);
    assert_eq!(sources, vec![ResultSource::Executed, ResultSource::Shared]);
    assert_eq!(
        harness
            .transport
            .tool_calls(&weather_id(), "get_forecast")
            .expect("calls"),
        1
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failures_are_reported_and_not_cached(harness: Harness) {
    connect(&harness, false).await;

    let error = harness
        .invoker
        .invoke(None, &weather_id(), "get_forecast", &json!({}))
        .await
        .expect_err("disabled server");

    assert!(matches!(
        error.supervisor_error(),
        McpSupervisorError::Domain(ToolRegistryDomainError::ServerDisabled { .. })
    ));
    assert_eq!(harness.invoker.cache().stats().size, 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn cancelled_executor_hands_the_call_to_a_waiter(harness: Harness) {
    connect(&harness, true).await;
    harness
        .transport
        .set_call_latency(Duration::from_millis(100))
        .expect("latency");
    let id = weather_id();
    let params = json!({"location": "Paris"});
    let cancel = CancellationToken::new();
    let cancel_soon = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
    };

    let (cancelled, waiting, ()) = tokio::join!(
        harness
            .invoker
            .invoke_with_cancellation(None, &id, "get_forecast", &params, &cancel),
        harness.invoker.invoke(None, &id, "get_forecast", &params),
        cancel_soon,
    );

    let error = cancelled.expect_err("first caller was cancelled");
    assert!(matches!(
        error.supervisor_error(),
        McpSupervisorError::Cancelled(server) if server == &id
    ));
    let outcome = waiting.expect("waiting caller is unaffected");
    assert_eq!(outcome.source, ResultSource::Executed);
    assert_eq!(harness.invoker.cache().stats().size, 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn cancelled_sole_caller_leaves_nothing_pending(harness: Harness) {
    connect(&harness, true).await;
    harness
        .transport
        .set_call_latency(Duration::from_millis(100))
        .expect("latency");
    let id = weather_id();
    let params = json!({"location": "Paris"});
    let cancel = CancellationToken::new();
    cancel.cancel();

    let cancelled = harness
        .invoker
        .invoke_with_cancellation(None, &id, "get_forecast", &params, &cancel)
        .await;
    let retried = harness
        .invoker
        .invoke(None, &id, "get_forecast", &params)
        .await
        .expect("fresh call");

    assert!(cancelled.is_err());
    assert_eq!(retried.source, ResultSource::Executed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callers_racing_a_finishing_call_never_execute_it_twice() {
    const KEYS: u32 = 200;
    const CALLERS: usize = 8;

    let transport = Arc::new(InMemoryMcpTransport::new());
    let clock = Arc::new(DefaultClock);
    let supervisor = McpServerSupervisor::new(
        Arc::clone(&transport),
        Arc::clone(&clock),
        SupervisorSettings::default(),
    );
    let config = McpServerConfig::new(
        weather_id(),
        McpServerName::new("Weather").expect("valid name"),
        McpTransport::http("https://weather.example/mcp").expect("valid transport"),
    );
    supervisor
        .initialize(vec![config])
        .await
        .expect("initialize");
    let invoker = Arc::new(CachedToolInvoker::new(
        supervisor,
        Arc::new(ToolResultCache::new(clock, ToolCacheSettings::default())),
    ));

    let mut callers = JoinSet::new();
    for key in 0..KEYS {
        let barrier = Arc::new(Barrier::new(CALLERS));
        for _ in 0..CALLERS {
            let invoker_handle = Arc::clone(&invoker);
            let start = Arc::clone(&barrier);
            callers.spawn(async move {
                start.wait().await;
                invoker_handle
                    .invoke(None, &weather_id(), "lookup", &json!({"key": key}))
                    .await
                    .map(|outcome| outcome.source)
            });
        }
    }

    let mut executed = 0_u32;
    while let Some(joined) = callers.join_next().await {
        let source = joined.expect("caller task").expect("invocation");
        if source == ResultSource::Executed {
            executed += 1;
        }
    }

    assert_eq!(executed, KEYS);
    assert_eq!(
        transport.tool_calls(&weather_id(), "lookup").expect("calls"),
        KEYS
    );
}
