//! Error types for Keylock

use thiserror::Error;

use crate::locking::{LockError, StoreError};

/// Result type alias using Keylock's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Keylock error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Lock errors (E300-E399)
    #[error(transparent)]
    Lock(#[from] LockError),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::Lock(LockError::Store(err))
    }
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lock(e) => e.code(),
            Self::ConfigError(_) => "E600",
            Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Lock(LockError::Timeout { key, .. }) => Some(format!(
                "Inspect the holder with `keylock status --key {}`; clear a dead holder with `keylock destroy --key {}`",
                key, key
            )),
            Self::Lock(LockError::Store(StoreError::Connection(_))) => {
                Some("Check the store URL with `keylock config get store.url`".to_string())
            }
            Self::ConfigError(_) => Some("keylock config list".to_string()),
            _ => None,
        }
    }

    /// True when the error is a lease acquisition timeout
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::Lock(e) if e.is_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_error() {
        let error = Error::from(LockError::Timeout {
            key: "lock:Report:42".to_string(),
            holder: "abc".to_string(),
        });

        assert_eq!(error.code(), "E300");
        assert!(error.is_lock_timeout());
        assert!(error.to_string().contains("lock:Report:42"));
        assert!(
            error
                .suggestion()
                .unwrap()
                .contains("keylock destroy --key lock:Report:42")
        );
    }

    #[test]
    fn test_store_error_converts_to_lock_error() {
        let error = Error::from(StoreError::Connection("refused".to_string()));

        assert_eq!(error.code(), "E302");
        assert!(!error.is_lock_timeout());
        assert_eq!(
            error.suggestion(),
            Some("Check the store URL with `keylock config get store.url`".to_string())
        );
    }

    #[test]
    fn test_config_error() {
        let error = Error::ConfigError("lock.timeout_secs must be positive".to_string());
        assert_eq!(error.code(), "E600");
        assert_eq!(error.suggestion(), Some("keylock config list".to_string()));
    }

    #[test]
    fn test_io_error() {
        let error = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        assert_eq!(error.code(), "E9999");
        assert_eq!(error.suggestion(), None);
    }
}
