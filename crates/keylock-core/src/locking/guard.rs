//! Lease guards for RAII-style lock management
//!
//! A guard releases its lease on drop, so the lease is given back even on
//! early returns and panics. Dropping cannot await, so the drop path hands
//! the release to the current Tokio runtime; call [`LeaseGuard::release`]
//! to release deterministically and observe the result.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::identity::{LockKey, Token};
use super::store::LeaseStore;
use super::types::{Acquisition, LockResult};

/// Proof that a lease is held by one lock instance
pub struct LeaseGuard {
    store: Arc<dyn LeaseStore>,
    key: LockKey,
    token: Token,
    ttl: Duration,
    acquisition: Acquisition,
    verbose: bool,
    released: bool,
}

impl LeaseGuard {
    pub(crate) fn new(
        store: Arc<dyn LeaseStore>,
        key: LockKey,
        token: Token,
        ttl: Duration,
        acquisition: Acquisition,
        verbose: bool,
    ) -> Self {
        Self {
            store,
            key,
            token,
            ttl,
            acquisition,
            verbose,
            released: false,
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// How the lease was obtained
    pub fn acquisition(&self) -> Acquisition {
        self.acquisition
    }

    /// Whether the lease was taken over rather than created
    pub fn was_overwritten(&self) -> bool {
        self.acquisition == Acquisition::Overwritten
    }

    /// Reset the lease TTL while it still carries our token.
    ///
    /// Returns `false` when the lease expired or changed hands.
    pub async fn extend(&self) -> LockResult<bool> {
        let extended = self
            .store
            .compare_and_extend(self.key.as_str(), self.token.as_str(), self.ttl)
            .await?;
        protocol_trace!(self.verbose, lock_key = %self.key, extended, "Lease renewal");
        Ok(extended)
    }

    /// Release the lease if it still carries our token.
    ///
    /// Returns `false` when there was nothing of ours to delete.
    pub async fn release(mut self) -> LockResult<bool> {
        self.released = true;
        protocol_trace!(
            self.verbose,
            lock_key = %self.key,
            token = %self.token,
            "Releasing lease if it still holds our token"
        );
        let deleted = self
            .store
            .compare_and_delete(self.key.as_str(), self.token.as_str())
            .await?;
        Ok(deleted)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let token = self.token.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.compare_and_delete(key.as_str(), token.as_str()).await {
                        warn!(lock_key = %key, error = %e, "Failed to release dropped lease");
                    }
                });
            }
            Err(_) => {
                // No runtime to run the release on; the TTL reclaims the lease
                warn!(lock_key = %key, "Lease guard dropped outside a runtime");
            }
        }
    }
}

impl fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("ttl", &self.ttl)
            .field("acquisition", &self.acquisition)
            .field("verbose", &self.verbose)
            .field("released", &self.released)
            .finish()
    }
}

impl fmt::Display for LeaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lease[{}]", self.key)
    }
}
