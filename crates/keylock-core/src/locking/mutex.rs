//! Lease mutex: acquisition, waiting, and release
//!
//! The mutex never holds in-process state that matters for exclusion. All
//! of it lives in the lease record, and every write to that record is one
//! atomic store operation:
//! - acquire: create-if-absent with TTL
//! - release: compare-and-delete against our token
//! - renew: compare-and-extend against our token
//!
//! Waiting is an iterative poll loop whose exit rule comes from the
//! configured [`WaitPolicy`].

use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::guard::LeaseGuard;
use super::identity::{LockKey, Token};
use super::policy::{Observation, StalenessDetector, jitter};
use super::store::LeaseStore;
use super::types::{Acquisition, LockConfig, LockError, LockResult, LockStatus, WaitPolicy};

/// A distributed mutex over one lease record
///
/// The token is minted at construction and reused by every acquisition made
/// through this instance.
pub struct LeaseMutex {
    store: Arc<dyn LeaseStore>,
    key: LockKey,
    token: Token,
    config: LockConfig,
    cancel: Option<CancellationToken>,
}

impl LeaseMutex {
    /// Create a mutex for `key` on `store`
    pub fn new(store: Arc<dyn LeaseStore>, key: LockKey, config: LockConfig) -> Self {
        let token = Token::generate(&key);
        Self {
            store,
            key,
            token,
            config,
            cancel: None,
        }
    }

    /// Create a mutex for the resource `type_name` / `instance_id`
    pub fn for_resource(
        store: Arc<dyn LeaseStore>,
        type_name: &str,
        instance_id: &str,
        config: LockConfig,
    ) -> Self {
        Self::new(store, LockKey::for_resource(type_name, instance_id), config)
    }

    /// Abort waits with [`LockError::Cancelled`] once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The lock name
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Run `critical` while holding the lease.
    ///
    /// The lease is released after `critical` finishes, whether it returns
    /// `Ok`, returns `Err`, or panics. A failed release is logged and never
    /// replaces the outcome of `critical`. Acquisition failures are converted
    /// into `E`.
    pub async fn with_lock<F, Fut, T, E>(&self, critical: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.acquire().await?;

        let outcome = AssertUnwindSafe(async move { critical().await })
            .catch_unwind()
            .await;

        if let Err(e) = guard.release().await {
            warn!(lock_key = %self.key, error = %e, "Failed to release lease after critical section");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Wait for the lease and return a guard that releases it
    pub async fn acquire(&self) -> LockResult<LeaseGuard> {
        let acquisition = self.wait_for_lease().await?;
        Ok(LeaseGuard::new(
            Arc::clone(&self.store),
            self.key.clone(),
            self.token.clone(),
            self.config.timeout,
            acquisition,
            self.config.verbose,
        ))
    }

    /// One atomic attempt to create the lease with our token
    pub async fn try_acquire(&self) -> LockResult<bool> {
        protocol_trace!(self.config.verbose, lock_key = %self.key, "Attempting to acquire lease");
        let created = self
            .store
            .create_with_ttl(self.key.as_str(), self.token.as_str(), self.config.timeout)
            .await?;
        Ok(created)
    }

    /// Delete the lease only if it still carries our token.
    ///
    /// Releasing a lease we do not hold is a no-op returning `false`.
    pub async fn release(&self) -> LockResult<bool> {
        protocol_trace!(
            self.config.verbose,
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

    /// Reset the lease TTL to `timeout` if it still carries our token
    pub async fn extend(&self) -> LockResult<bool> {
        let extended = self
            .store
            .compare_and_extend(self.key.as_str(), self.token.as_str(), self.config.timeout)
            .await?;
        protocol_trace!(self.config.verbose, lock_key = %self.key, extended, "Lease renewal");
        Ok(extended)
    }

    /// Unconditionally delete the lease, whoever holds it
    pub async fn destroy(&self) -> LockResult<bool> {
        info!(lock_key = %self.key, "Destroying lease");
        Ok(self.store.delete(self.key.as_str()).await?)
    }

    /// Token of the current holder, if any
    pub async fn holder(&self) -> LockResult<Option<String>> {
        Ok(self.store.get(self.key.as_str()).await?)
    }

    pub async fn status(&self) -> LockResult<LockStatus> {
        let holder = self.holder().await?;
        Ok(match holder {
            None => LockStatus::Available,
            Some(ref value) if self.token.matches(Some(value.as_str())) => LockStatus::HeldBySelf,
            Some(_) => LockStatus::HeldByOther,
        })
    }

    /// Drive [`Self::try_acquire`] until the policy says stop
    pub(crate) async fn wait_for_lease(&self) -> LockResult<Acquisition> {
        let start = Instant::now();

        let acquisition = match self.config.policy {
            WaitPolicy::FixedAttempts {
                ticks,
                fail_on_timeout,
            } => self.wait_fixed_attempts(ticks.max(1), fail_on_timeout).await?,
            WaitPolicy::StalenessAware => self.wait_until_stale().await?,
        };

        protocol_trace!(
            self.config.verbose,
            lock_key = %self.key,
            elapsed_ms = start.elapsed().as_millis() as u64,
            overwritten = acquisition == Acquisition::Overwritten,
            "Lease acquired"
        );
        Ok(acquisition)
    }

    async fn wait_fixed_attempts(&self, ticks: u32, fail_on_timeout: bool) -> LockResult<Acquisition> {
        let tick = self.config.wait_tick();

        for attempt in 1..=ticks {
            if attempt > 1 {
                protocol_trace!(
                    self.config.verbose,
                    lock_key = %self.key,
                    attempt,
                    wait_ms = tick.as_millis() as u64,
                    "Lease busy, sleeping before next attempt"
                );
                self.pause(tick).await?;
            }
            if self.try_acquire().await? {
                return Ok(Acquisition::Acquired);
            }
        }

        warn!(lock_key = %self.key, attempts = ticks, "Failed to acquire lease");
        if fail_on_timeout {
            return Err(LockError::Timeout {
                key: self.key.to_string(),
                holder: self.describe_holder().await,
            });
        }

        self.overwrite().await?;
        Ok(Acquisition::Overwritten)
    }

    async fn wait_until_stale(&self) -> LockResult<Acquisition> {
        let mut detector = StalenessDetector::new(self.config.timeout, Instant::now());

        loop {
            if self.try_acquire().await? {
                return Ok(Acquisition::Acquired);
            }

            self.pause(jitter(self.config.jitter_max)).await?;

            let now = Instant::now();
            if !detector.deadline_passed(now) {
                continue;
            }

            let holder = self.holder().await?;
            match detector.observe(holder, now) {
                Observation::Rearmed => {
                    protocol_trace!(
                        self.config.verbose,
                        lock_key = %self.key,
                        holder = detector.baseline().unwrap_or("none"),
                        windows = detector.windows_elapsed(),
                        "Lease window elapsed, holder is changing"
                    );
                }
                Observation::Stale { holder } => {
                    warn!(
                        lock_key = %self.key,
                        holder = %holder,
                        windows = detector.windows_elapsed(),
                        "Lease held by the same token for two windows"
                    );
                    return Err(LockError::Timeout {
                        key: self.key.to_string(),
                        holder,
                    });
                }
            }
        }
    }

    /// Current holder for diagnostics; a failed read is reported, not raised
    async fn describe_holder(&self) -> String {
        match self.holder().await {
            Ok(Some(token)) => token,
            Ok(None) => "none".to_string(),
            Err(e) => {
                warn!(lock_key = %self.key, error = %e, "Could not read lease holder");
                "unknown".to_string()
            }
        }
    }

    /// Best-effort takeover once the fixed-attempt budget is spent
    async fn overwrite(&self) -> LockResult<()> {
        warn!(lock_key = %self.key, token = %self.token, "Overwriting lease with our token");
        self.store
            .force_set(self.key.as_str(), self.token.as_str(), self.config.timeout)
            .await?;
        Ok(())
    }

    /// Sleep between polls, returning early if the wait is cancelled
    async fn pause(&self, delay: std::time::Duration) -> LockResult<()> {
        match &self.cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => Err(LockError::Cancelled {
                    key: self.key.to_string(),
                }),
                _ = sleep(delay) => Ok(()),
            },
            None => {
                sleep(delay).await;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for LeaseMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseMutex")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
