//! Tool results reused from memory and from rendered documents.

use super::helpers::{TestContext, context, server_id, stdio_server};
use mcp_resilience::document_cache::{ToolResultBlock, find_existing_result};
use mcp_resilience::tool_cache::{
    CachedToolInvoker, ResultSource, ToolCacheSettings, ToolResultCache,
};
use mockable::DefaultClock;
use rstest::rstest;
use serde_json::json;
use std::sync::Arc;

fn invoker(context: &TestContext) -> CachedToolInvoker<
    mcp_resilience::tool_registry::adapters::InMemoryMcpTransport,
    DefaultClock,
> {
    let cache = Arc::new(ToolResultCache::new(
        Arc::new(DefaultClock),
        ToolCacheSettings::default(),
    ));
    CachedToolInvoker::new(context.supervisor.clone(), cache)
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn rendered_result_is_reused_from_the_document(context: TestContext) {
    let id = server_id("weather");
    context
        .supervisor
        .initialize(vec![stdio_server("weather")])
        .await
        .expect("initialize");
    context
        .transport
        .set_tool_response(&id, "get_forecast", json!({"summary": "Sunny"}))
        .expect("canned response");
    let invoker = invoker(&context);
    let params = json!({"location": "Paris"});

    let executed = invoker
        .invoke(None, &id, "get_forecast", &params)
        .await
        .expect("execute");
    let block = ToolResultBlock {
        server_id: id.as_str().to_owned(),
        server_name: Some("Weather".to_owned()),
        tool_name: "get_forecast".to_owned(),
        parameters: params.clone(),
        duration_ms: Some(42),
        executed_at: None,
        result: executed.result.to_string(),
    };
    let document = format!(
        "# Trip notes\n\n{}\n\nPack an umbrella anyway.\n",
        block.to_markdown().expect("render")
    );

    let record = find_existing_result(&document, id.as_str(), "get_forecast", &params)
        .expect("block is found");
    let reused = invoker
        .invoke(Some(&document), &id, "get_forecast", &params)
        .await
        .expect("reuse");

    assert_eq!(executed.source, ResultSource::Executed);
    assert_eq!(record.duration_ms, Some(42));
    assert_eq!(reused.source, ResultSource::Document);
    assert_eq!(reused.result, json!(r#"{"summary":"Sunny"}"#));
    assert_eq!(
        context
            .transport
            .tool_calls(&id, "get_forecast")
            .expect("calls"),
        1
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn cache_entries_are_scoped_per_server(context: TestContext) {
    context
        .supervisor
        .initialize(vec![stdio_server("alpha"), stdio_server("beta")])
        .await
        .expect("initialize");
    let invoker = invoker(&context);
    let params = json!({"query": "rust"});

    for id in ["alpha", "beta", "alpha", "beta"] {
        let _result = invoker
            .invoke(None, &server_id(id), "search", &params)
            .await
            .expect("invoke");
    }
    invoker.cache().clear_server("alpha");
    let after_clear = invoker
        .invoke(None, &server_id("alpha"), "search", &params)
        .await
        .expect("invoke");

    assert_eq!(after_clear.source, ResultSource::Executed);
    assert_eq!(
        context
            .transport
            .tool_calls(&server_id("alpha"), "search")
            .expect("calls"),
        2
    );
    assert_eq!(
        context
            .transport
            .tool_calls(&server_id("beta"), "search")
            .expect("calls"),
        1
    );
}
