//! Block scanner for tool results embedded in markdown.
//!
//! A candidate block is a run of `>`-quoted lines that begins with a
//! `[!tool]` or `[!mcp]` callout header. Inside the block the scanner looks
//! for metadata lines, one fenced invocation block, a results marker, and
//! one fenced result block. Blocks that do not fit are skipped.

use super::{DocumentToolRecord, LineRange};
use crate::tool_cache::hash_parameters;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

#[expect(clippy::expect_used, reason = "patterns are literals exercised by the tests")]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^\s*\[!(?:tool|mcp)\][+-]?(?:\s+(.*))?$"));
static RESULTS_MARKER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^(?:#+\s*)?results?\s*:?$"));
static DURATION: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)(\d+)\s*ms\b"));

/// Why a candidate block was skipped.
#[derive(Debug, Error, PartialEq, Eq)]
enum BlockError {
    #[error("no Server ID line")]
    MissingServerId,
    #[error("no tool name in the invocation or the header")]
    MissingToolName,
    #[error("expected one invocation block, found {0}")]
    InvocationCount(usize),
    #[error("expected one result block after the results marker, found {0}")]
    ResultCount(usize),
    #[error("fenced block opened on line {0} is never closed")]
    UnterminatedFence(usize),
    #[error("invocation block does not parse: {0}")]
    InvocationSyntax(String),
    #[error("invocation block is not a mapping")]
    InvocationNotMapping,
    #[error("invocation `tool` is not a non-empty string")]
    InvalidToolName,
}

/// Parses every well-formed tool block in `document`, in document order.
pub(super) fn parse_document(document: &str) -> Vec<DocumentToolRecord> {
    candidate_blocks(document)
        .into_iter()
        .filter_map(|block| {
            parse_block(&block)
                .inspect_err(|error| {
                    debug!(line = block.header_line, reason = %error, "skipping tool block");
                })
                .ok()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence {
    marker: char,
    len: usize,
}

impl Fence {
    fn open(content: &str) -> Option<Self> {
        let trimmed = content.trim_start();
        let marker = trimmed.chars().next().filter(|c| matches!(c, '`' | '~'))?;
        let len = trimmed.chars().take_while(|c| *c == marker).count();
        if len < 3 {
            return None;
        }
        let info_has_backtick = trimmed.chars().skip(len).any(|c| c == '`');
        if marker == '`' && info_has_backtick {
            return None;
        }
        Some(Self { marker, len })
    }

    fn is_closed_by(self, content: &str) -> bool {
        let trimmed = content.trim();
        trimmed.chars().count() >= self.len && trimmed.chars().all(|c| c == self.marker)
    }
}

#[derive(Debug)]
struct CandidateBlock<'a> {
    header_line: usize,
    last_line: usize,
    label: &'a str,
    body: Vec<(usize, &'a str)>,
}

fn quote_content(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('>')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn header_label(content: &str) -> Option<&str> {
    let captures = HEADER.captures(content)?;
    Some(captures.get(1).map_or("", |label| label.as_str()))
}

fn candidate_blocks(document: &str) -> Vec<CandidateBlock<'_>> {
    let mut blocks = Vec::new();
    let mut current: Option<CandidateBlock<'_>> = None;
    let mut fence: Option<Fence> = None;

    for (line_no, line) in document.lines().enumerate() {
        let Some(content) = quote_content(line) else {
            blocks.extend(current.take());
            fence = None;
            continue;
        };

        if fence.is_none()
            && let Some(label) = header_label(content)
        {
            blocks.extend(current.take());
            current = Some(CandidateBlock {
                header_line: line_no,
                last_line: line_no,
                label,
                body: Vec::new(),
            });
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };
        block.body.push((line_no, content));
        block.last_line = line_no;
        fence = match fence {
            Some(open) if open.is_closed_by(content) => None,
            Some(open) => Some(open),
            None => Fence::open(content),
        };
    }

    blocks.extend(current);
    blocks
}

struct FencedBody {
    start: usize,
    end: usize,
    text: String,
    after_marker: bool,
}

struct OpenFence<'a> {
    fence: Fence,
    start: usize,
    lines: Vec<&'a str>,
    after_marker: bool,
}

impl OpenFence<'_> {
    fn finish(self, end: usize) -> FencedBody {
        FencedBody {
            start: self.start,
            end,
            text: self.lines.join("\n"),
            after_marker: self.after_marker,
        }
    }
}

#[derive(Default)]
struct Metadata {
    server_id: Option<String>,
    duration_ms: Option<u64>,
    executed_at: Option<DateTime<Utc>>,
}

fn strip_emphasis(content: &str) -> String {
    content.chars().filter(|c| !matches!(c, '*' | '`')).collect()
}

fn is_results_marker(content: &str) -> bool {
    RESULTS_MARKER.is_match(strip_emphasis(content).trim())
}

/// Applies a `Key: value` metadata line; other lines are ignored.
fn apply_metadata(content: &str, metadata: &mut Metadata) {
    let cleaned = strip_emphasis(content);
    let line = cleaned.trim().trim_start_matches(['-', '+']).trim_start();
    let Some((key, value)) = line.split_once(':') else {
        return;
    };

    match key.trim().to_ascii_lowercase().as_str() {
        "server id" | "server-id" | "server_id" => {
            let server_id = value.trim();
            if !server_id.is_empty() {
                metadata.server_id = Some(server_id.to_owned());
            }
        }
        "duration" => {
            metadata.duration_ms = DURATION
                .captures(value)
                .and_then(|captures| captures.get(1))
                .and_then(|digits| digits.as_str().parse().ok());
        }
        "executed" | "executed at" => {
            metadata.executed_at = DateTime::parse_from_rfc3339(value.trim())
                .ok()
                .map(|timestamp| timestamp.with_timezone(&Utc));
        }
        _ => {}
    }
}

/// Splits a `server: tool` header label.
fn parse_label(label: &str) -> Option<(String, String)> {
    let cleaned = strip_emphasis(label);
    let (server, tool) = cleaned.split_once(':')?;
    let server_name = server.trim();
    let tool_name = tool.trim();
    if server_name.is_empty() || tool_name.is_empty() {
        return None;
    }
    Some((server_name.to_owned(), tool_name.to_owned()))
}

fn parse_invocation(text: &str) -> Result<(Option<String>, Map<String, Value>), BlockError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(text)
        .map_err(|error| BlockError::InvocationSyntax(error.to_string()))?;
    let json = serde_json::to_value(yaml)
        .map_err(|error| BlockError::InvocationSyntax(error.to_string()))?;
    let Value::Object(mut parameters) = json else {
        return Err(BlockError::InvocationNotMapping);
    };

    let tool = match parameters.remove("tool") {
        None => None,
        Some(Value::String(name)) if !name.trim().is_empty() => Some(name.trim().to_owned()),
        Some(_) => return Err(BlockError::InvalidToolName),
    };
    Ok((tool, parameters))
}

fn parse_block(block: &CandidateBlock<'_>) -> Result<DocumentToolRecord, BlockError> {
    let mut metadata = Metadata::default();
    let mut marker_seen = false;
    let mut bodies = Vec::new();
    let mut open_fence: Option<OpenFence<'_>> = None;

    for &(line_no, content) in &block.body {
        match open_fence.take() {
            Some(mut open) if !open.fence.is_closed_by(content) => {
                open.lines.push(content);
                open_fence = Some(open);
                continue;
            }
            Some(open) => {
                bodies.push(open.finish(line_no));
                continue;
            }
            None => {}
        }

        if let Some(fence) = Fence::open(content) {
            open_fence = Some(OpenFence {
                fence,
                start: line_no,
                lines: Vec::new(),
                after_marker: marker_seen,
            });
        } else if is_results_marker(content) {
            marker_seen = true;
        } else {
            apply_metadata(content, &mut metadata);
        }
    }

    if let Some(open) = open_fence {
        return Err(BlockError::UnterminatedFence(open.start));
    }

    let (results, invocations): (Vec<FencedBody>, Vec<FencedBody>) =
        bodies.into_iter().partition(|body| body.after_marker);
    let [invocation] = <[FencedBody; 1]>::try_from(invocations)
        .map_err(|found| BlockError::InvocationCount(found.len()))?;
    let [result] = <[FencedBody; 1]>::try_from(results)
        .map_err(|found| BlockError::ResultCount(found.len()))?;

    let (invoked_tool, parameters) = parse_invocation(&invocation.text)?;
    let label = parse_label(block.label);
    let server_id = metadata.server_id.ok_or(BlockError::MissingServerId)?;
    let tool_name = invoked_tool
        .or_else(|| label.as_ref().map(|(_, tool)| tool.clone()))
        .ok_or(BlockError::MissingToolName)?;
    let parameter_values = Value::Object(parameters);

    Ok(DocumentToolRecord {
        server_id,
        server_name: label.map(|(server, _)| server),
        tool_name,
        parameter_hash: hash_parameters(&parameter_values),
        parameters: parameter_values,
        duration_ms: metadata.duration_ms,
        executed_at: metadata.executed_at,
        result_markdown: result.text,
        source_range: LineRange::new(block.header_line, block.last_line),
        result_range: LineRange::new(result.start, result.end),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    const WEATHER_BLOCK: &str = "\
Intro paragraph.

> [!tool] Weather Service: get_forecast
> Server ID: weather
> Duration: 120ms
> Executed: 2026-01-01T12:00:00Z
>
> ```yaml
> tool: get_forecast
> location: Paris
> units: metric
> ```
>
> **Result:**
>
> ```
> {\"temp\": 18}
> ```

Outro.";

    #[test]
    fn parses_a_complete_block() {
        let records = parse_document(WEATHER_BLOCK);

        assert_eq!(records.len(), 1);
        let record = records.first().expect("one record");
        assert_eq!(record.server_id, "weather");
        assert_eq!(record.server_name.as_deref(), Some("Weather Service"));
        assert_eq!(record.tool_name, "get_forecast");
        assert_eq!(record.parameters, json!({"location": "Paris", "units": "metric"}));
        assert_eq!(record.duration_ms, Some(120));
        assert_eq!(
            record.executed_at.map(|at| at.to_rfc3339()),
            Some("2026-01-01T12:00:00+00:00".to_owned())
        );
        assert_eq!(record.result_markdown, "{\"temp\": 18}");
        assert_eq!(record.source_range, LineRange::new(2, 17));
        assert_eq!(record.result_range, LineRange::new(15, 17));
    }

    #[rstest]
    #[case("Result:")]
    #[case("Results")]
    #[case("**Result**")]
    #[case("### Results")]
    #[case("## result:")]
    fn recognises_results_marker_variants(#[case] marker: &str) {
        assert!(is_results_marker(marker));
    }

    #[rstest]
    #[case("Results of the run")]
    #[case("Server ID: x")]
    fn rejects_non_markers(#[case] line: &str) {
        assert!(!is_results_marker(line));
    }

    #[test]
    fn longer_fences_may_contain_shorter_ones() {
        let document = "\
> [!MCP]
> Server ID: docs
> ```json
> {\"tool\": \"render\", \"page\": 1}
> ```
> Results:
> ````markdown
> ```rust
> fn main() {}
> ```
> ````";

        let records = parse_document(document);

        let record = records.first().expect("one record");
        assert_eq!(record.tool_name, "render");
        assert_eq!(record.server_name, None);
        assert_eq!(record.result_markdown, "```rust\nfn main() {}\n```");
    }

    #[test]
    fn label_tool_is_used_when_invocation_omits_it() {
        let document = "\
> [!tool] search: web_search
> Server ID: search
> ```yaml
> query: rust
> ```
> Result:
> ```
> ok
> ```";

        let records = parse_document(document);

        assert_eq!(
            records.first().map(|record| record.tool_name.as_str()),
            Some("web_search")
        );
    }

    #[rstest]
    #[case::missing_server_id("> [!tool] a: b\n> ```\n> x: 1\n> ```\n> Result:\n> ```\n> ok\n> ```")]
    #[case::two_invocations(
        "> [!tool]\n> Server ID: s\n> ```\n> tool: t\n> ```\n> ```\n> tool: t\n> ```\n> Result:\n> ```\n> ok\n> ```"
    )]
    #[case::no_marker("> [!tool]\n> Server ID: s\n> ```\n> tool: t\n> ```\n> ```\n> ok\n> ```")]
    #[case::unterminated("> [!tool]\n> Server ID: s\n> ```\n> tool: t\n> ```\n> Result:\n> ```\n> ok")]
    #[case::not_a_mapping("> [!tool]\n> Server ID: s\n> ```\n> - tool\n> ```\n> Result:\n> ```\n> ok\n> ```")]
    #[case::bad_yaml("> [!tool]\n> Server ID: s\n> ```\n> tool: [unclosed\n> ```\n> Result:\n> ```\n> ok\n> ```")]
    #[case::no_tool_name("> [!tool]\n> Server ID: s\n> ```\n> q: 1\n> ```\n> Result:\n> ```\n> ok\n> ```")]
    fn malformed_blocks_are_dropped(#[case] document: &str) {
        assert!(parse_document(document).is_empty());
    }

    #[test]
    fn quoted_text_without_header_is_ignored() {
        assert!(parse_document("> Just a quote.\n> Server ID: s").is_empty());
    }

    #[test]
    fn parsing_is_idempotent() {
        assert_eq!(parse_document(WEATHER_BLOCK), parse_document(WEATHER_BLOCK));
    }
}
