//! Time-bounded cache of tool results.
//!
//! [`ToolResultCache`] avoids re-executing an identical call within its
//! TTL. [`CachedToolInvoker`] layers the document cache, the result cache,
//! and the supervisor, and collapses concurrent identical calls into one
//! execution.

mod cache;
mod invoker;
mod key;
mod settings;

pub use cache::{CacheStats, CachedToolResult, ToolResultCache};
pub use invoker::{CachedToolInvoker, ResultSource, ToolInvocation, ToolInvocationError};
pub use key::{cache_key, canonicalize, hash_canonical, hash_parameters};
pub use settings::ToolCacheSettings;

#[cfg(test)]
mod tests;
