//! Coordination store adapter.
//!
//! The distributed runtime needs a small slice of a key-value server: leases
//! with TTL, compare-and-delete, compare-and-set, plain strings and string
//! sets. `RedisStore`
//! is the production backend; `MemoryStore` serves single-process setups and
//! tests.

pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("coordination store error: {0}")]
    Backend(String),

    #[error("coordination store is closed")]
    Closed,
}

/// Result of `set_if_absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Acquired,
    Exists,
}

/// Result of `compare_and_delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// Key absent or owned by someone else; nothing was deleted.
    Noop,
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Set `key` to `value` with a TTL unless a live value exists.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<SetOutcome, StoreError>;

    /// Delete `key` only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<ReleaseOutcome, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Replace `key` with `value` only if it currently holds `expected`.
    /// Returns whether the write happened.
    async fn compare_and_set(&self, key: &str, expected: &str, value: &str) -> Result<bool, StoreError>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError>;

    async fn srem(&self, set: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError>;

    /// Write a wallet state and register its shard as known and running.
    /// Backends with transactions apply all three at once.
    async fn upsert_wallet(
        &self,
        state_key: &str,
        state_json: &str,
        known_set: &str,
        running_set: &str,
        shard: &str,
    ) -> Result<(), StoreError> {
        self.set(state_key, state_json).await?;
        self.sadd(known_set, shard).await?;
        self.sadd(running_set, shard).await
    }

    /// Write a stopped wallet state over `expected` and drop its shard from
    /// the running set. Nothing changes when the state moved on meanwhile.
    async fn stop_wallet(
        &self,
        state_key: &str,
        expected: &str,
        state_json: &str,
        running_set: &str,
        shard: &str,
    ) -> Result<bool, StoreError> {
        if !self.compare_and_set(state_key, expected, state_json).await? {
            return Ok(false);
        }
        self.srem(running_set, shard).await?;
        Ok(true)
    }

    async fn close(&self) -> Result<(), StoreError>;
}
