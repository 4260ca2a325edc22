//! Records recovered from tool blocks embedded in a document.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Inclusive, zero-based range of document lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineRange {
    /// First line of the range.
    pub start: usize,
    /// Last line of the range.
    pub end: usize,
}

impl LineRange {
    /// Creates a range spanning `start..=end`.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Returns the number of lines covered.
    #[must_use]
    pub const fn line_count(&self) -> usize {
        self.end.saturating_sub(self.start).saturating_add(1)
    }
}

/// A tool result previously written into a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentToolRecord {
    /// Server identifier from the `Server ID:` line.
    pub server_id: String,
    /// Server part of the header label, when present.
    pub server_name: Option<String>,
    /// Tool name from the invocation block, or the header label.
    pub tool_name: String,
    /// Invocation parameters, without the `tool` key.
    pub parameters: Value,
    /// Key-order independent hash of `parameters`.
    pub parameter_hash: String,
    /// Reported execution time in milliseconds.
    pub duration_ms: Option<u64>,
    /// When the tool was executed.
    pub executed_at: Option<DateTime<Utc>>,
    /// Raw text of the result block.
    pub result_markdown: String,
    /// Lines occupied by the whole block.
    pub source_range: LineRange,
    /// Lines occupied by the result fence, fences included.
    pub result_range: LineRange,
}
