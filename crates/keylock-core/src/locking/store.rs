//! Store abstraction for lease records
//!
//! A lease is a single key/value/TTL triple. Every operation that writes or
//! conditionally writes a lease must be one atomic round-trip against the
//! store; the lock never composes a read with a later write on the client.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a lease store backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached
    #[error("connection failed: {0}")]
    Connection(String),

    /// The store rejected or failed a command
    #[error("command failed: {0}")]
    Command(String),

    /// The store answered with something the backend cannot interpret
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Atomic operations a lease lock needs from its key-value store
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Set `key` to `value` with `ttl` only if `key` is absent.
    ///
    /// Returns `true` iff the key was absent and now holds `value`.
    async fn create_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Delete `key` only if it currently holds `expected`.
    ///
    /// Returns `true` iff the key held `expected` and was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Reset the TTL of `key` only if it currently holds `expected`.
    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Unconditionally overwrite `key` with `value` and `ttl`.
    async fn force_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Read the current value of `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally delete `key`. Returns whether a record existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}
