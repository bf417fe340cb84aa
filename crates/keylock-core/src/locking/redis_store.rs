//! Redis lease store
//!
//! Conditional writes run as Lua scripts so that the check and the write
//! happen in one server-side step.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{ErrorKind, RedisError, Script};
use std::time::Duration;
use tracing::debug;

use super::store::{LeaseStore, StoreError};
use super::types::LockConfig;

/// SET NX with a millisecond TTL. Returns 1 when the key was created.
const ACQUIRE_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
    return 1
end
return 0
"#;

/// DEL only when the stored value is ours.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// PEXPIRE only when the stored value is ours.
const EXTEND_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() || err.is_connection_dropped() {
            StoreError::Connection(err.to_string())
        } else if err.kind() == ErrorKind::TypeError {
            StoreError::UnexpectedReply(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Redis rejects a zero PX, so sub-millisecond TTLs round up to one.
/// TTLs above [`LockConfig::MAX_TIMEOUT`] are capped to it.
fn ttl_millis(ttl: Duration) -> u64 {
    let capped = ttl.min(LockConfig::MAX_TIMEOUT);
    u64::try_from(capped.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Lease store backed by a single Redis instance
#[derive(Clone)]
pub struct RedisLeaseStore {
    conn: MultiplexedConnection,
    acquire: Script,
    release: Script,
    extend: Script,
}

impl RedisLeaseStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("invalid redis url '{}': {}", url, e)))?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(url = %url, "Connected to redis lease store");
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing multiplexed connection
    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            acquire: Script::new(ACQUIRE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
            extend: Script::new(EXTEND_SCRIPT),
        }
    }
}

impl std::fmt::Debug for RedisLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLeaseStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn create_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let created: i64 = self
            .acquire
            .key(key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(created == 1)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .extend
            .key(key)
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn force_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }
}
