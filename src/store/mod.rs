//! Coordination store abstraction
//!
//! Every piece of cross-process state in this crate lives behind the
//! [`CoordinationStore`] trait: the leader lease, its fencing counter and the
//! shared envelope queue. Two implementations are provided:
//!
//! - [`RedisStore`] - production backend over a `deadpool-redis` pool
//! - [`MemoryStore`] - in-process backend used by tests and single-node runs
//!
//! # Vocabulary
//!
//! | Operation | Semantics |
//! |-----------|-----------|
//! | `acquire(key, holder, ttl)` | atomic set-if-absent with expiry |
//! | `get(key)` | current holder, if any |
//! | `refresh(key, ttl)` | reset expiry of an existing key |
//! | `release(key, holder)` | delete only if `holder` still owns the key |
//! | `next_generation(key)` | monotonically increasing lease generation |
//! | `push_batch(list, items)` | append many items to a list in one call |
//! | `pop_one(list)` | atomically remove the head of a list |

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisStore, RedisStoreConfig};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared, dynamically dispatched store handle
pub type SharedStore = Arc<dyn CoordinationStore>;

/// Errors returned by a coordination store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (refused, dropped, timed out, pool exhausted)
    #[error("Coordination store unreachable: {0}")]
    Connection(String),

    /// The store answered but the command failed
    #[error("Store command failed: {0}")]
    Command(String),
}

impl StoreError {
    /// Whether this error means the store itself is unavailable
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Operations the coordination layer needs from its backing store
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Set `key = holder` with expiry `ttl` only if `key` is absent.
    ///
    /// Returns `Ok(false)` when another holder already owns the key.
    async fn acquire(&self, key: &str, holder: &str, ttl: Duration) -> StoreResult<bool>;

    /// Read the current holder of `key`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Reset the expiry of `key` to `ttl`. Returns `Ok(false)` if the key is gone.
    async fn refresh(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete `key` if and only if its value is still `holder`
    async fn release(&self, key: &str, holder: &str) -> StoreResult<bool>;

    /// Increment and return the generation counter associated with `key`
    async fn next_generation(&self, key: &str) -> StoreResult<u64>;

    /// Append `items` to the tail of `list_key`, returning how many were pushed
    async fn push_batch(&self, list_key: &str, items: &[String]) -> StoreResult<usize>;

    /// Remove and return the head of `list_key`; `Ok(None)` when the list is empty
    async fn pop_one(&self, list_key: &str) -> StoreResult<Option<String>>;

    /// Round-trip check used by readiness reporting
    async fn ping(&self) -> StoreResult<()>;
}

/// Key holding the generation counter for a lease
pub fn generation_key(lease_key: &str) -> String {
    format!("{lease_key}:generation")
}
