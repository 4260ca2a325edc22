//! Connection descriptors for reaching an MCP server.

use super::ToolRegistryDomainError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings for an MCP server spawned as a local process over STDIO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioTransportConfig {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

impl StdioTransportConfig {
    /// Creates a new STDIO transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyStdioCommand`] when `command`
    /// is empty after trimming.
    pub fn new(command: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        let config = Self {
            command: command.into().trim().to_owned(),
            args: Vec::new(),
            env: BTreeMap::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Replaces command-line arguments.
    #[must_use]
    pub fn with_args(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.args = values.into_iter().collect();
        self
    }

    /// Replaces process environment variables.
    #[must_use]
    pub fn with_env(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = values.into_iter().collect();
        self
    }

    /// Returns the executable command.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns command-line arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns environment variables.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    fn validate(&self) -> Result<(), ToolRegistryDomainError> {
        if self.command.trim().is_empty() {
            return Err(ToolRegistryDomainError::EmptyStdioCommand);
        }
        Ok(())
    }
}

/// Settings for a remote MCP server reached over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    url: String,
}

impl HttpTransportConfig {
    /// Creates a new HTTP transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError`] when `url` is empty or does not
    /// start with `http://` or `https://`.
    pub fn new(url: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        let config = Self {
            url: url.into().trim().to_owned(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn validate(&self) -> Result<(), ToolRegistryDomainError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ToolRegistryDomainError::EmptyHttpUrl);
        }

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolRegistryDomainError::InvalidHttpUrl(url.to_owned()));
        }
        Ok(())
    }
}

/// Supported MCP transport variants.
///
/// Deserialised with a `type` tag:
///
/// ```yaml
/// type: stdio
/// command: weather-mcp
/// args: ["--units", "metric"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum McpTransport {
    /// MCP over local process STDIO.
    Stdio(StdioTransportConfig),
    /// MCP over HTTP.
    Http(HttpTransportConfig),
}

impl McpTransport {
    /// Creates a `stdio` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`StdioTransportConfig::new`].
    pub fn stdio(command: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        Ok(Self::Stdio(StdioTransportConfig::new(command)?))
    }

    /// Creates an `http` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`HttpTransportConfig::new`].
    pub fn http(url: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        Ok(Self::Http(HttpTransportConfig::new(url)?))
    }

    /// Re-validates a descriptor that was deserialised without checks.
    ///
    /// # Errors
    ///
    /// Returns the same errors as the variant constructors.
    pub fn validate(&self) -> Result<(), ToolRegistryDomainError> {
        match self {
            Self::Stdio(config) => config.validate(),
            Self::Http(config) => config.validate(),
        }
    }
}
