//! MCP tool definition value object.

use super::ToolRegistryDomainError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata for a tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    name: String,
    description: Option<String>,
    input_schema: Value,
}

impl McpToolDefinition {
    /// Creates a tool definition.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyToolName`] when the name is
    /// empty after trimming.
    pub fn new(name: impl Into<String>, input_schema: Value) -> Result<Self, ToolRegistryDomainError> {
        let normalized_name = name.into().trim().to_owned();
        if normalized_name.is_empty() {
            return Err(ToolRegistryDomainError::EmptyToolName);
        }

        Ok(Self {
            name: normalized_name,
            description: None,
            input_schema,
        })
    }

    /// Sets a description; blank descriptions are ignored.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let normalized = description.into().trim().to_owned();
        self.description = (!normalized.is_empty()).then_some(normalized);
        self
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the optional tool description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the JSON schema of the tool parameters.
    #[must_use]
    pub const fn input_schema(&self) -> &Value {
        &self.input_schema
    }
}
