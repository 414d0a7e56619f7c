//! Key/value store trait for state shared across instances.
//!
//! Cache entries, the throttle timestamp and request counters all live in
//! the same backend so that several proxy instances (and restarts) see a
//! single view.

use async_trait::async_trait;
use std::time::Duration;
use crate::error::Result;

/// Generic key-value state store.
///
/// Implementations can use Redis or an in-process map. Expired entries must
/// read as absent; the callers never check TTLs themselves.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set a value with optional TTL, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Set a value only if the key does not exist (for distributed locks).
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool>;

    /// Delete `key` only if it still holds `expected` (lease release).
    /// Returns whether the key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Atomically increment an integer counter, returning the new value.
    async fn incr(&self, key: &str) -> Result<i64>;
}
