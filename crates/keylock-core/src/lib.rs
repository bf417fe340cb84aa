//! Keylock Core Library
//!
//! This crate provides the core functionality for Keylock, including:
//! - Lease locks coordinated through a shared key-value store
//! - Staleness-aware and fixed-attempt wait policies
//! - Redis and in-memory lease stores
//! - File-backed configuration

pub mod config;
pub mod error;
pub mod locking;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::locking::{
        LeaseGuard, LeaseMutex, LeaseStore, LockConfig, LockError, LockKey, WaitPolicy,
    };
}
