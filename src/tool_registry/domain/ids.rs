//! Identifier and validated-name types for MCP servers.

use super::ToolRegistryDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length for an MCP server display name.
const MAX_SERVER_NAME_LENGTH: usize = 100;

/// Stable identifier of a configured MCP server.
///
/// Identifiers come from user settings and are embedded in documents
/// (`Server ID:` lines), so they are free-form text without whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct McpServerId(String);

impl McpServerId {
    /// Creates a validated server identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyServerId`] when the trimmed
    /// value is empty, or [`ToolRegistryDomainError::InvalidServerId`] when it
    /// contains whitespace or control characters.
    pub fn new(value: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        let normalized = value.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(ToolRegistryDomainError::EmptyServerId);
        }

        let has_invalid_character = normalized
            .chars()
            .any(|character| character.is_whitespace() || character.is_control());
        if has_invalid_character {
            return Err(ToolRegistryDomainError::InvalidServerId(normalized));
        }

        Ok(Self(normalized))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for McpServerId {
    type Error = ToolRegistryDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<McpServerId> for String {
    fn from(value: McpServerId) -> Self {
        value.0
    }
}

impl AsRef<str> for McpServerId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for McpServerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Validated, human-readable MCP server name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct McpServerName(String);

impl McpServerName {
    /// Creates a validated server name.
    ///
    /// The input is trimmed; interior whitespace and punctuation are kept
    /// because names are rendered into document headers.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError`] when the name is empty or longer
    /// than 100 characters.
    pub fn new(value: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        let normalized = value.into().trim().to_owned();

        if normalized.is_empty() {
            return Err(ToolRegistryDomainError::EmptyServerName);
        }

        if normalized.chars().count() > MAX_SERVER_NAME_LENGTH {
            return Err(ToolRegistryDomainError::ServerNameTooLong(normalized));
        }

        Ok(Self(normalized))
    }

    /// Returns the server name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for McpServerName {
    type Error = ToolRegistryDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<McpServerName> for String {
    fn from(value: McpServerName) -> Self {
        value.0
    }
}

impl AsRef<str> for McpServerName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for McpServerName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
