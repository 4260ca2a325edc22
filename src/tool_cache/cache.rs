//! In-memory TTL cache of tool results.

use super::{ToolCacheSettings, cache_key, canonicalize};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// A cached result together with its age.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedToolResult {
    /// The stored tool result.
    pub result: Value,
    /// Parameters of the cached call in canonical key order.
    pub parameters: Value,
    /// Time elapsed since the result was stored.
    pub cache_age: Duration,
    /// When the result was stored.
    pub cached_at: DateTime<Utc>,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that returned a fresh entry.
    pub hits: u64,
    /// Lookups that found nothing fresh.
    pub misses: u64,
    /// Stored entries, including expired ones not yet purged.
    pub size: usize,
    /// Age of the oldest fresh entry, `None` when no entry is fresh.
    pub oldest_entry_age: Option<Duration>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Value,
    cached_at: DateTime<Utc>,
    server_id: String,
    tool_name: String,
    parameters: Value,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    ttl: Duration,
}

impl CacheState {
    fn reset_counters(&mut self) {
        self.hits = 0;
        self.misses = 0;
    }
}

/// Time-bounded cache of tool results keyed by server, tool, and
/// parameters.
///
/// Entries are keyed with [`cache_key`], so parameter objects that differ
/// only in key order share an entry. An entry is fresh while its age does
/// not exceed the TTL. Changing the TTL affects later freshness checks
/// only; stored timestamps are kept.
pub struct ToolResultCache<C: Clock> {
    clock: Arc<C>,
    state: Mutex<CacheState>,
}

impl<C: Clock> ToolResultCache<C> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(clock: Arc<C>, settings: ToolCacheSettings) -> Self {
        Self {
            clock,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                ttl: settings.ttl(),
            }),
        }
    }

    /// Looks up a fresh result.
    ///
    /// A hit increments `hits`; an absent or expired entry increments
    /// `misses`. Expired entries are dropped on lookup.
    pub fn get(&self, server_id: &str, tool_name: &str, parameters: &Value) -> Option<CachedToolResult> {
        let key = cache_key(server_id, tool_name, parameters);
        let now = self.clock.utc();
        let mut state = self.lock();
        let ttl = state.ttl;

        let fresh = state
            .entries
            .get(&key)
            .map(|entry| (entry.clone(), age_at(entry.cached_at, now)));
        match fresh {
            Some((entry, age)) if age <= ttl => {
                state.hits = state.hits.saturating_add(1);
                debug!(server_id, tool = tool_name, age_ms = duration_ms(age), "tool cache hit");
                Some(CachedToolResult {
                    result: entry.result,
                    parameters: entry.parameters,
                    cache_age: age,
                    cached_at: entry.cached_at,
                })
            }
            Some(_) => {
                state.entries.remove(&key);
                state.misses = state.misses.saturating_add(1);
                debug!(server_id, tool = tool_name, "tool cache entry expired");
                None
            }
            None => {
                state.misses = state.misses.saturating_add(1);
                debug!(server_id, tool = tool_name, "tool cache miss");
                None
            }
        }
    }

    /// Stores `result`, replacing any entry for the same invocation.
    pub fn set(&self, server_id: &str, tool_name: &str, parameters: &Value, result: Value) {
        let key = cache_key(server_id, tool_name, parameters);
        let entry = CacheEntry {
            result,
            cached_at: self.clock.utc(),
            server_id: server_id.to_owned(),
            tool_name: tool_name.to_owned(),
            parameters: canonicalize(parameters),
        };
        self.lock().entries.insert(key, entry);
    }

    /// Removes every entry and resets the counters.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.reset_counters();
    }

    /// Removes every entry of one server and resets the counters.
    pub fn clear_server(&self, server_id: &str) {
        let mut state = self.lock();
        state.entries.retain(|_, entry| entry.server_id != server_id);
        state.reset_counters();
    }

    /// Removes every entry of one tool and resets the counters.
    pub fn clear_tool(&self, server_id: &str, tool_name: &str) {
        let mut state = self.lock();
        state
            .entries
            .retain(|_, entry| entry.server_id != server_id || entry.tool_name != tool_name);
        state.reset_counters();
    }

    /// Drops expired entries, leaving the counters untouched.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.utc();
        let mut state = self.lock();
        let ttl = state.ttl;
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| age_at(entry.cached_at, now) <= ttl);
        before.saturating_sub(state.entries.len())
    }

    /// Returns the cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.utc();
        let state = self.lock();
        let oldest_entry_age = state
            .entries
            .values()
            .map(|entry| age_at(entry.cached_at, now))
            .filter(|age| *age <= state.ttl)
            .max();

        CacheStats {
            hits: state.hits,
            misses: state.misses,
            size: state.entries.len(),
            oldest_entry_age,
        }
    }

    /// Returns hits as a percentage of lookups, or `0.0` before any lookup.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        clippy::cast_precision_loss,
        reason = "hit rate is reported as a floating-point percentage"
    )]
    pub fn hit_rate(&self) -> f64 {
        let state = self.lock();
        let requests = state.hits.saturating_add(state.misses);
        if requests == 0 {
            return 0.0;
        }
        state.hits as f64 / requests as f64 * 100.0
    }

    /// Replaces the time-to-live.
    pub fn set_ttl(&self, ttl: Duration) {
        self.lock().ttl = ttl;
    }

    /// Returns the time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.lock().ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn age_at(cached_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - cached_at).to_std().unwrap_or_default()
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
