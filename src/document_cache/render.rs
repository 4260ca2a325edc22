//! Rendering of tool result blocks in the format the scanner reads.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;

/// Errors returned while rendering a [`ToolResultBlock`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentRenderError {
    /// Parameters must be a JSON object.
    #[error("tool parameters must be an object")]
    ParametersNotObject,

    /// `tool` is reserved for the tool name in the invocation block.
    #[error("parameter name `tool` is reserved")]
    ReservedParameter,

    /// The invocation could not be encoded as YAML.
    #[error("failed to encode invocation: {0}")]
    Encoding(String),
}

/// A tool result to be written into a document.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultBlock {
    /// Server identifier written to the `Server ID:` line.
    pub server_id: String,
    /// Display name used in the header label; the identifier when absent.
    pub server_name: Option<String>,
    /// Invoked tool.
    pub tool_name: String,
    /// Invocation parameters.
    pub parameters: Value,
    /// Execution time in milliseconds.
    pub duration_ms: Option<u64>,
    /// Execution timestamp.
    pub executed_at: Option<DateTime<Utc>>,
    /// Raw result text.
    pub result: String,
}

impl ToolResultBlock {
    /// Renders the block as quoted markdown.
    ///
    /// Fences are made longer than any backtick run in their content so the
    /// result text is preserved verbatim when the document is scanned.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentRenderError`] when the parameters are not an object,
    /// contain a `tool` key, or cannot be encoded.
    pub fn to_markdown(&self) -> Result<String, DocumentRenderError> {
        let invocation = self.invocation_yaml()?;
        let label = self.server_name.as_deref().unwrap_or(&self.server_id);

        let mut lines = vec![
            format!("[!tool] {label}: {}", self.tool_name),
            format!("Server ID: {}", self.server_id),
        ];
        if let Some(duration_ms) = self.duration_ms {
            lines.push(format!("Duration: {duration_ms}ms"));
        }
        if let Some(executed_at) = self.executed_at {
            lines.push(format!(
                "Executed: {}",
                executed_at.to_rfc3339_opts(SecondsFormat::Millis, true)
            ));
        }
        lines.push(String::new());
        push_fenced(&mut lines, "yaml", invocation.trim_end());
        lines.push(String::new());
        lines.push("**Result:**".to_owned());
        lines.push(String::new());
        push_fenced(&mut lines, "", &self.result);

        Ok(lines
            .iter()
            .map(|line| {
                if line.is_empty() {
                    ">".to_owned()
                } else {
                    format!("> {line}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn invocation_yaml(&self) -> Result<String, DocumentRenderError> {
        let Value::Object(parameters) = &self.parameters else {
            return Err(DocumentRenderError::ParametersNotObject);
        };
        if parameters.contains_key("tool") {
            return Err(DocumentRenderError::ReservedParameter);
        }

        let mut mapping = serde_yaml::Mapping::new();
        mapping.insert("tool".into(), self.tool_name.clone().into());
        for (key, value) in parameters {
            let encoded = serde_yaml::to_value(value)
                .map_err(|error| DocumentRenderError::Encoding(error.to_string()))?;
            mapping.insert(key.clone().into(), encoded);
        }
        serde_yaml::to_string(&mapping).map_err(|error| DocumentRenderError::Encoding(error.to_string()))
    }
}

fn push_fenced(lines: &mut Vec<String>, info: &str, body: &str) {
    let fence = "`".repeat(longest_backtick_run(body).saturating_add(1).max(3));
    lines.push(format!("{fence}{info}"));
    lines.extend(body.lines().map(str::to_owned));
    lines.push(fence);
}

fn longest_backtick_run(text: &str) -> usize {
    text.split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or_default()
}
