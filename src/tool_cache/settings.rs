//! Tool result cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TTL_MS: u64 = 300_000;

/// Settings for [`super::ToolResultCache`].
///
/// Deserialises from `{ ttl_ms: 300000 }`; the field may be omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawToolCacheSettings", into = "RawToolCacheSettings")]
pub struct ToolCacheSettings {
    ttl: Duration,
}

impl ToolCacheSettings {
    /// Creates settings with the given time-to-live.
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// Returns how long entries stay fresh.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for ToolCacheSettings {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TTL_MS))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawToolCacheSettings {
    #[serde(default = "default_ttl_ms")]
    ttl_ms: u64,
}

const fn default_ttl_ms() -> u64 {
    DEFAULT_TTL_MS
}

impl From<RawToolCacheSettings> for ToolCacheSettings {
    fn from(raw: RawToolCacheSettings) -> Self {
        Self::new(Duration::from_millis(raw.ttl_ms))
    }
}

impl From<ToolCacheSettings> for RawToolCacheSettings {
    fn from(settings: ToolCacheSettings) -> Self {
        Self {
            ttl_ms: u64::try_from(settings.ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
