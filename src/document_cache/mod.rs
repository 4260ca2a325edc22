//! Recovery of tool results already written into a document.
//!
//! Tool output persisted in a document survives restarts, unlike the
//! in-memory [`crate::tool_cache::ToolResultCache`]. The functions here scan
//! the document text on every call and match blocks by server, tool, and a
//! key-order independent parameter hash.
//!
//! Blocks look like this:
//!
//! ````markdown
//! > [!tool] Weather Service: get_forecast
//! > Server ID: weather
//! > Duration: 120ms
//! > Executed: 2026-01-01T12:00:00Z
//! >
//! > ```yaml
//! > tool: get_forecast
//! > location: Paris
//! > ```
//! >
//! > **Result:**
//! >
//! > ```
//! > {"temp": 18}
//! > ```
//! ````

mod parser;
mod record;
mod render;

pub use record::{DocumentToolRecord, LineRange};
pub use render::{DocumentRenderError, ToolResultBlock};

use serde_json::Value;

/// Returns every well-formed tool block in document order.
///
/// Malformed blocks are skipped without affecting their neighbours.
#[must_use]
pub fn get_all_results(document: &str) -> Vec<DocumentToolRecord> {
    parser::parse_document(document)
}

/// Returns the first block recording the same server, tool, and parameter
/// values.
#[must_use]
pub fn find_existing_result(
    document: &str,
    server_id: &str,
    tool_name: &str,
    parameters: &Value,
) -> Option<DocumentToolRecord> {
    let parameter_hash = hash_parameters(parameters);
    parser::parse_document(document).into_iter().find(|record| {
        record.server_id == server_id
            && record.tool_name == tool_name
            && record.parameter_hash == parameter_hash
    })
}

/// Hashes parameters the same way recovered records are hashed.
#[must_use]
pub fn hash_parameters(parameters: &Value) -> String {
    crate::tool_cache::hash_parameters(parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOCUMENT: &str = "\
# Trip notes

> [!tool] Weather: get_forecast
> Server ID: weather
> Duration: 85ms
>
> ```yaml
> tool: get_forecast
> location: Paris
> units: metric
> ```
>
> Result:
> ```
> Sunny, 18C
> ```

> [!tool] Weather: get_forecast
> Server ID: weather
> ```yaml
> tool: get_forecast
> location: [broken
> ```
> Result:
> ```
> never read
> ```

> [!mcp] Weather: get_forecast
> Server ID: weather
> Executed: 2026-01-02T08:30:00Z
> ```json
> {\"tool\": \"get_forecast\", \"location\": \"Lyon\", \"units\": \"metric\"}
> ```
> ### Results
> ```
> Rain, 12C
> ```
";

    #[test]
    fn lookup_ignores_parameter_key_order() {
        let record = find_existing_result(
            DOCUMENT,
            "weather",
            "get_forecast",
            &json!({"units": "metric", "location": "Paris"}),
        )
        .expect("Paris forecast is recorded");

        assert_eq!(
            record.parameter_hash,
            hash_parameters(&json!({"location": "Paris", "units": "metric"}))
        );
        assert_eq!(record.result_markdown, "Sunny, 18C");
    }

    #[test]
    fn missing_executed_line_leaves_timestamp_unset() {
        let record = find_existing_result(
            DOCUMENT,
            "weather",
            "get_forecast",
            &json!({"location": "Paris", "units": "metric"}),
        )
        .expect("record");

        assert_eq!(record.executed_at, None);
        assert_eq!(record.duration_ms, Some(85));
    }

    #[test]
    fn all_results_are_in_document_order_and_skip_malformed_blocks() {
        let records = get_all_results(DOCUMENT);

        let locations: Vec<_> = records
            .iter()
            .map(|record| record.parameters.get("location").cloned())
            .collect();
        assert_eq!(locations, vec![Some(json!("Paris")), Some(json!("Lyon"))]);
        assert!(
            records
                .windows(2)
                .all(|pair| matches!(pair, [first, second] if first.source_range.end < second.source_range.start))
        );
    }

    #[test]
    fn different_values_do_not_match() {
        let found = find_existing_result(
            DOCUMENT,
            "weather",
            "get_forecast",
            &json!({"location": "Paris", "units": "imperial"}),
        );

        assert!(found.is_none());
    }
}
