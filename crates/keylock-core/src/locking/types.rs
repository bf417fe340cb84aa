//! Lock types and error definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use super::policy::MIN_PAUSE;
use super::store::StoreError;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// Lease acquisition gave up under the configured wait policy
    #[error("Lock timeout: resource '{key}' is held by {holder}")]
    Timeout { key: String, holder: String },

    /// The wait loop was aborted through its cancellation token
    #[error("Lock wait cancelled: resource '{key}'")]
    Cancelled { key: String },

    /// The backing store failed or was unreachable
    #[error("Lock store error: {0}")]
    Store(#[from] StoreError),
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "E300",
            Self::Cancelled { .. } => "E301",
            Self::Store(_) => "E302",
        }
    }

    /// True when the lease could not be acquired within the policy bound
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// What to do once waiting for a lease has gone on "too long"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Poll a fixed number of times spread evenly across the timeout window.
    ///
    /// When the attempts run out the lock either fails with
    /// [`LockError::Timeout`] or takes the lease over by overwriting it.
    FixedAttempts { ticks: u32, fail_on_timeout: bool },

    /// Poll with random jitter until the same holder token survives two full
    /// lease windows. Never overwrites a live lease.
    StalenessAware,
}

impl WaitPolicy {
    /// Default attempt budget for the fixed-attempt policy
    pub const DEFAULT_TICKS: u32 = 100;

    /// Fixed-attempt policy with the given budget (at least one attempt)
    pub fn fixed(ticks: u32, fail_on_timeout: bool) -> Self {
        Self::FixedAttempts {
            ticks: ticks.max(1),
            fail_on_timeout,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedAttempts { .. } => "fixed",
            Self::StalenessAware => "staleness",
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::StalenessAware
    }
}

impl fmt::Display for WaitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WaitPolicy {
    type Err = String;

    /// Parses a policy name. `fixed` uses the default attempt budget and
    /// takes the lease over on exhaustion.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staleness" | "staleness_aware" => Ok(Self::StalenessAware),
            "fixed" | "fixed_attempts" => Ok(Self::fixed(Self::DEFAULT_TICKS, false)),
            other => Err(format!(
                "unknown wait policy '{}' (expected 'staleness' or 'fixed')",
                other
            )),
        }
    }
}

/// How a wait for the lease ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The lease was free and created atomically
    Acquired,
    /// Attempts ran out and the lease was forcibly overwritten
    Overwritten,
}

/// Lock status as seen by one lock instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    /// No lease exists for the key
    Available,
    /// The lease carries this instance's token
    HeldBySelf,
    /// The lease carries somebody else's token
    HeldByOther,
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::HeldBySelf => write!(f, "held_by_self"),
            Self::HeldByOther => write!(f, "held_by_other"),
        }
    }
}

/// Configuration for a lease lock
#[derive(Debug, Clone, PartialEq)]
pub struct LockConfig {
    /// Lease TTL, and the length of one observation window while waiting
    pub timeout: Duration,

    /// Wait strategy used when the lease is taken
    pub policy: WaitPolicy,

    /// Upper bound (exclusive) of the random pause between polls in the
    /// staleness-aware policy
    pub jitter_max: Duration,

    /// Emit the per-step protocol trace at info level instead of debug
    pub verbose: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300), // 5 minutes
            policy: WaitPolicy::default(),
            jitter_max: Duration::from_secs(1),
            verbose: false,
        }
    }
}

impl LockConfig {
    /// Longest lease a lock may request (30 days); longer timeouts are capped
    pub const MAX_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    /// Set the lease timeout, capped at [`Self::MAX_TIMEOUT`]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.min(Self::MAX_TIMEOUT);
        self
    }

    /// Set the wait policy
    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shorthand for the fixed-attempt policy
    pub fn with_fixed_attempts(self, ticks: u32, fail_on_timeout: bool) -> Self {
        self.with_policy(WaitPolicy::fixed(ticks, fail_on_timeout))
    }

    /// Set the jitter bound for the staleness-aware policy.
    ///
    /// Bounds below [`MIN_PAUSE`] are raised to it.
    pub fn with_jitter_max(mut self, jitter_max: Duration) -> Self {
        self.jitter_max = jitter_max.max(MIN_PAUSE);
        self
    }

    /// Toggle verbose protocol tracing
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Longest pause between two polls under the configured policy
    pub fn wait_tick(&self) -> Duration {
        match self.policy {
            WaitPolicy::FixedAttempts { ticks, .. } => self.timeout / ticks.max(1),
            WaitPolicy::StalenessAware => self.jitter_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_config_defaults() {
        let config = LockConfig::default();

        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.policy, WaitPolicy::StalenessAware);
        assert_eq!(config.jitter_max, Duration::from_secs(1));
        assert!(!config.verbose);
    }

    #[test]
    fn test_lock_config_builder() {
        let config = LockConfig::default()
            .with_timeout(Duration::from_secs(1))
            .with_fixed_attempts(10, true)
            .with_verbose(true);

        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(
            config.policy,
            WaitPolicy::FixedAttempts {
                ticks: 10,
                fail_on_timeout: true
            }
        );
        assert_eq!(config.wait_tick(), Duration::from_millis(100));
        assert!(config.verbose);
    }

    #[test]
    fn test_lock_config_clamps_extremes() {
        let config = LockConfig::default()
            .with_timeout(Duration::MAX)
            .with_jitter_max(Duration::ZERO);

        assert_eq!(config.timeout, LockConfig::MAX_TIMEOUT);
        assert_eq!(config.jitter_max, MIN_PAUSE);
    }

    #[test]
    fn test_fixed_policy_needs_one_attempt() {
        assert_eq!(
            WaitPolicy::fixed(0, false),
            WaitPolicy::FixedAttempts {
                ticks: 1,
                fail_on_timeout: false
            }
        );
    }

    #[test]
    fn test_wait_policy_parsing() {
        assert_eq!(
            "staleness".parse::<WaitPolicy>(),
            Ok(WaitPolicy::StalenessAware)
        );
        assert_eq!(
            "fixed".parse::<WaitPolicy>(),
            Ok(WaitPolicy::fixed(WaitPolicy::DEFAULT_TICKS, false))
        );
        assert!("fifo".parse::<WaitPolicy>().is_err());
    }

    #[test]
    fn test_lock_status_display() {
        assert_eq!(LockStatus::Available.to_string(), "available");
        assert_eq!(LockStatus::HeldBySelf.to_string(), "held_by_self");
        assert_eq!(LockStatus::HeldByOther.to_string(), "held_by_other");
    }

    #[test]
    fn test_lock_error_codes() {
        let timeout_err = LockError::Timeout {
            key: "lock:Report:1".to_string(),
            holder: "abc".to_string(),
        };
        assert_eq!(timeout_err.code(), "E300");
        assert!(timeout_err.is_timeout());

        let cancelled = LockError::Cancelled {
            key: "lock:Report:1".to_string(),
        };
        assert_eq!(cancelled.code(), "E301");
        assert!(!cancelled.is_timeout());

        let store_err = LockError::from(StoreError::Connection("refused".to_string()));
        assert_eq!(store_err.code(), "E302");
    }
}
