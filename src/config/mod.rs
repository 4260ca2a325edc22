//! YAML configuration of supervised servers, supervisor policy, and the
//! tool result cache.
//!
//! ```yaml
//! servers:
//!   - id: weather
//!     name: Weather
//!     transport:
//!       type: http
//!       url: https://weather.example/mcp
//! supervisor:
//!   failure_threshold: 3
//!   health_check_interval_ms: 30000
//!   retry_policy:
//!     max_attempts: 5
//! cache:
//!   ttl_ms: 300000
//! ```
//!
//! Every section is optional and falls back to its defaults.

use crate::tool_cache::ToolCacheSettings;
use crate::tool_registry::{
    domain::{McpServerConfig, McpServerId, ToolRegistryDomainError},
    services::SupervisorSettings,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration from {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The document is not valid YAML or does not match the schema.
    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A server entry failed domain validation.
    #[error(transparent)]
    Domain(#[from] ToolRegistryDomainError),

    /// Two server entries share an identifier.
    #[error("server {0} is configured more than once")]
    DuplicateServer(McpServerId),
}

/// Complete configuration of the resilience layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Servers handed to the supervisor at startup.
    pub servers: Vec<McpServerConfig>,
    /// Supervisor thresholds and retry policy.
    pub supervisor: SupervisorSettings,
    /// Tool result cache settings.
    pub cache: ToolCacheSettings,
}

impl ResilienceConfig {
    /// Parses and validates configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] for malformed documents or invalid
    /// settings, [`ConfigError::Domain`] for invalid transports, and
    /// [`ConfigError::DuplicateServer`] when an identifier repeats.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise
    /// the errors of [`Self::from_yaml_str`].
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = path.as_ref();
        let text = tokio::fs::read_to_string(file)
            .await
            .map_err(|source| ConfigError::Io {
                path: file.to_path_buf(),
                source,
            })?;
        let config = Self::from_yaml_str(&text)?;
        debug!(path = %file.display(), servers = config.servers.len(), "loaded configuration");
        Ok(config)
    }

    /// Checks transports and identifier uniqueness.
    ///
    /// # Errors
    ///
    /// See [`Self::from_yaml_str`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            server.transport.validate()?;
            if !seen.insert(&server.id) {
                return Err(ConfigError::DuplicateServer(server.id.clone()));
            }
        }
        Ok(())
    }
}
