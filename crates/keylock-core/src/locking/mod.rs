//! Lease locking over a shared key-value store
//!
//! Independent processes serialize access to a named resource by racing to
//! create a lease record that expires on its own. The record's value is the
//! owner's token, so only the owner can delete or renew it.
//!
//! # Architecture
//!
//! - **Identity**: `LockKey` (namespaced resource name) and `Token` (per-instance proof of ownership)
//! - **Store**: `LeaseStore` trait with Redis and in-memory backends
//! - **Mutex**: `LeaseMutex` drives acquisition, waiting, renewal, and release
//! - **Guards**: RAII-style lease guards for automatic release
//!
//! # Wait policies
//!
//! - `WaitPolicy::StalenessAware` (default): poll with jitter and give up only
//!   when the same holder token survives two full lease windows
//! - `WaitPolicy::FixedAttempts`: poll a fixed number of times, then fail or
//!   take the lease over
//!
//! # Example
//!
//! ```ignore
//! use keylock_core::locking::{LeaseMutex, LockConfig, RedisLeaseStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(RedisLeaseStore::connect("redis://127.0.0.1/").await?);
//! let lock = LeaseMutex::for_resource(store, "Report", "42", LockConfig::default());
//!
//! lock.with_lock(|| async {
//!     // Only one process runs this at a time
//!     rebuild_report(42).await
//! })
//! .await?;
//! ```

/// Per-step protocol trace; `verbose` locks log it at info level
macro_rules! protocol_trace {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

pub mod guard;
pub mod identity;
pub mod memory;
pub mod mutex;
pub mod policy;
pub mod redis_store;
pub mod store;
pub mod types;

// Re-export main types
pub use guard::LeaseGuard;
pub use identity::{LockKey, Token};
pub use memory::MemoryLeaseStore;
pub use mutex::LeaseMutex;
pub use policy::{Observation, StalenessDetector};
pub use redis_store::RedisLeaseStore;
pub use store::{LeaseStore, StoreError};
pub use types::{Acquisition, LockConfig, LockError, LockResult, LockStatus, WaitPolicy};
