//! Tests for cache-aware invocation.

mod invoker_tests;
