//! Backoff policy engine for tool-server connections.
//!
//! The engine is pure decision logic: it classifies failures as transient or
//! permanent, computes bounded exponential delays, tracks a retry sequence in
//! [`RetryState`], and drives a retry loop that suspends between attempts.
//! It owns no timers beyond the sleep inside [`with_retry`].

mod classify;
mod error;
mod policy;
mod retry;
mod state;

pub use classify::{RetryableError, is_transient_error};
pub use error::{RetryError, RetryPolicyError};
pub use policy::{RetryPolicy, calculate_retry_delay};
pub use retry::{RetryNotice, should_retry, with_retry};
pub use state::RetryState;
