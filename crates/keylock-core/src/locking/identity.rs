//! Lock keys and ownership tokens

use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Namespace prefix shared by every lock key
pub const KEY_PREFIX: &str = "lock";

const SEPARATOR: char = ':';

/// Name of the lease record protecting one resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Build the key for a resource of `type_name` identified by `instance_id`.
    ///
    /// The result is `lock:<type>:<id>` with repeated separators collapsed,
    /// so `("Report", ":42")` and `("Report", "42")` name the same lease.
    pub fn for_resource(type_name: &str, instance_id: &str) -> Self {
        Self::from_raw(&format!(
            "{KEY_PREFIX}{SEPARATOR}{type_name}{SEPARATOR}{instance_id}"
        ))
    }

    /// Use a caller-built key verbatim, apart from separator collapsing
    pub fn from_raw(raw: &str) -> Self {
        let mut key = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c == SEPARATOR && key.ends_with(SEPARATOR) {
                continue;
            }
            key.push(c);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LockKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Proof of ownership written as the lease value
///
/// Minted once per lock instance. Two live instances never share a token
/// with non-negligible probability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    /// Mint a fresh token for `key`
    pub fn generate(key: &LockKey) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(key.as_str().as_bytes());
        hasher.update(b"_");
        hasher.update(nanos.to_le_bytes());
        hasher.update(Uuid::new_v4().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a value read from the store is this token
    pub fn matches(&self, value: Option<&str>) -> bool {
        value == Some(self.0.as_str())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
