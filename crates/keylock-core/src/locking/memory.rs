//! In-process lease store
//!
//! Holds lease records in a map guarded by a Tokio mutex. Expiry follows the
//! Tokio clock, so paused-time tests observe TTLs deterministically. Useful
//! for tests and for coordinating tasks that share one process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::store::{LeaseStore, StoreError};

#[derive(Debug, Clone)]
struct Record {
    value: String,
    expires_at: Option<Instant>,
}

impl Record {
    /// A TTL past the clock's range leaves the record without expiry
    fn leased(value: &str, now: Instant, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: now.checked_add(ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now < exp).unwrap_or(true)
    }
}

/// Lease store backed by a process-local map
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    records: Mutex<HashMap<String, Record>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a record with no expiry, bypassing lease semantics.
    ///
    /// Stands in for a holder that never releases and never renews.
    pub async fn insert_persistent(&self, key: &str, value: &str) {
        let mut records = self.records.lock().await;
        records.insert(
            key.to_string(),
            Record {
                value: value.to_string(),
                expires_at: None,
            },
        );
    }

    /// Remaining lifetime of a live record; `None` if absent or persistent
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let records = self.records.lock().await;
        records
            .get(key)
            .filter(|r| r.is_live(now))
            .and_then(|r| r.expires_at)
            .map(|exp| exp.saturating_duration_since(now))
    }

    /// Whether a live record exists for `key`
    pub async fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let records = self.records.lock().await;
        records.get(key).map(|r| r.is_live(now)).unwrap_or(false)
    }

    fn purge_expired(records: &mut HashMap<String, Record>, key: &str, now: Instant) {
        if records.get(key).map(|r| !r.is_live(now)).unwrap_or(false) {
            records.remove(key);
        }
    }

    /// Drop every expired record, not only the one being written
    fn sweep_expired(records: &mut HashMap<String, Record>, now: Instant) {
        records.retain(|_, record| record.is_live(now));
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn create_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        Self::sweep_expired(&mut records, now);

        if records.contains_key(key) {
            return Ok(false);
        }

        records.insert(key.to_string(), Record::leased(value, now, ttl));
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        Self::purge_expired(&mut records, key, now);

        match records.get(key) {
            Some(record) if record.value == expected => {
                records.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        Self::purge_expired(&mut records, key, now);

        match records.get_mut(key) {
            Some(record) if record.value == expected => {
                record.expires_at = now.checked_add(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        Self::sweep_expired(&mut records, now);
        records.insert(key.to_string(), Record::leased(value, now, ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let records = self.records.lock().await;
        Ok(records
            .get(key)
            .filter(|r| r.is_live(now))
            .map(|r| r.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        Self::purge_expired(&mut records, key, now);
        Ok(records.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_create_only_when_absent() {
        let store = MemoryLeaseStore::new();

        assert!(store.create_with_ttl("k", "a", Duration::from_secs(1)).await.unwrap());
        assert!(!store.create_with_ttl("k", "b", Duration::from_secs(1)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_expire() {
        let store = MemoryLeaseStore::new();
        store
            .create_with_ttl("k", "a", Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(1001)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.create_with_ttl("k", "b", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_and_delete_checks_value() {
        let store = MemoryLeaseStore::new();
        store
            .create_with_ttl("k", "a", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!store.compare_and_delete("k", "b").await.unwrap());
        assert!(store.contains("k").await);
        assert!(store.compare_and_delete("k", "a").await.unwrap());
        assert!(!store.contains("k").await);
        assert!(!store.compare_and_delete("k", "a").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_and_extend_resets_ttl() {
        let store = MemoryLeaseStore::new();
        store
            .create_with_ttl("k", "a", Duration::from_secs(2))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(!store.compare_and_extend("k", "b", Duration::from_secs(2)).await.unwrap());
        assert!(store.compare_and_extend("k", "a", Duration::from_secs(2)).await.unwrap());
        assert_eq!(store.ttl("k").await, Some(Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_abandoned_keys() {
        let store = MemoryLeaseStore::new();
        for i in 0..50 {
            let key = format!("lock:Report:{i}");
            store
                .create_with_ttl(&key, "gone", Duration::from_secs(1))
                .await
                .unwrap();
        }
        store.insert_persistent("lock:Report:keep", "1").await;
        assert_eq!(store.records.lock().await.len(), 51);

        tokio::time::advance(Duration::from_secs(2)).await;
        store
            .create_with_ttl("lock:Report:new", "a", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(store.records.lock().await.len(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        store
            .force_set("lock:Report:other", "b", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(store.records.lock().await.len(), 2);
        assert!(store.contains("lock:Report:keep").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_does_not_overflow_clock() {
        let store = MemoryLeaseStore::new();

        assert!(store.create_with_ttl("k", "a", Duration::MAX).await.unwrap());
        assert!(store.compare_and_extend("k", "a", Duration::MAX).await.unwrap());
        store.force_set("j", "b", Duration::MAX).await.unwrap();

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(store.contains("k").await);
        assert!(store.contains("j").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_record_has_no_ttl() {
        let store = MemoryLeaseStore::new();
        store.insert_persistent("k", "1").await;

        tokio::time::advance(Duration::from_secs(3600)).await;

        assert!(store.contains("k").await);
        assert_eq!(store.ttl("k").await, None);
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }
}
