//! In-memory coordination store
//!
//! DashMap-backed implementation of [`CoordinationStore`]. Used for
//! standalone nodes and tests. Each key is guarded by its shard lock, which
//! makes the counter and set-if-not-exists operations atomic per key.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{parse_counter, CoordinationStore, Namespace};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn counter(value: i64) -> Bytes {
        Bytes::from(value.to_string())
    }

    #[inline]
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }
}

/// Store operation statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Live keys (expired keys not yet collected included)
    pub key_count: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations (set, increment, decrement, set-if-not-exists)
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

/// In-memory store with lazy TTL expiry
pub struct InMemoryStore {
    entries: DashMap<String, StoredValue>,
    available: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drop every expired key.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired());
        before.saturating_sub(self.entries.len())
    }

    /// Get operation statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            key_count: self.entries.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable(
                "in-memory store is marked unavailable".to_string(),
            ))
        }
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Bytes>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let qualified = ns.qualify(key);
        let expired = match self.entries.get(&qualified) {
            Some(value) if !value.is_expired() => return Ok(Some(value.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(&qualified, |_, v| v.is_expired());
        }
        Ok(None)
    }

    async fn set(
        &self,
        ns: Namespace,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        self.entries
            .insert(ns.qualify(key), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<bool> {
        self.check_available()?;
        self.deletes.fetch_add(1, Ordering::Relaxed);

        Ok(self
            .entries
            .remove(&ns.qualify(key))
            .map(|(_, v)| !v.is_expired())
            .unwrap_or(false))
    }

    async fn increment(&self, ns: Namespace, key: &str, ttl: Option<Duration>) -> Result<i64> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        match self.entries.entry(ns.qualify(key)) {
            Entry::Occupied(mut occupied) => {
                let value = occupied.get_mut();
                let current = if value.is_expired() {
                    value.expires_at = None;
                    0
                } else {
                    parse_counter("increment", &value.data)?
                };
                let next = current + 1;
                value.data = StoredValue::counter(next);
                if let Some(ttl) = ttl {
                    value.expires_at = Some(Instant::now() + ttl);
                }
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(StoredValue::counter(1), ttl));
                Ok(1)
            }
        }
    }

    async fn decrement_floor_zero(&self, ns: Namespace, key: &str) -> Result<i64> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        match self.entries.entry(ns.qualify(key)) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.remove();
                    return Ok(0);
                }
                let value = occupied.get_mut();
                let current = parse_counter("decrement_floor_zero", &value.data)?;
                let next = (current - 1).max(0);
                value.data = StoredValue::counter(next);
                Ok(next)
            }
            Entry::Vacant(_) => Ok(0),
        }
    }

    async fn set_if_not_exists(
        &self,
        ns: Namespace,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        match self.entries.entry(ns.qualify(key)) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(value, Some(ttl)));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryStore::new();

        store
            .set(Namespace::Permanent, "k", Bytes::from_static(b"v"), None)
            .await
            .unwrap();
        assert_eq!(
            store.get(Namespace::Permanent, "k").await.unwrap(),
            Some(Bytes::from_static(b"v"))
        );
        // Same key, other namespace
        assert!(store.get(Namespace::Bypass, "k").await.unwrap().is_none());

        assert!(store.delete(Namespace::Permanent, "k").await.unwrap());
        assert!(!store.delete(Namespace::Permanent, "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = InMemoryStore::new();

        store
            .set(
                Namespace::Partial,
                "k",
                Bytes::from_static(b"v"),
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap();
        assert!(store.get(Namespace::Partial, "k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get(Namespace::Partial, "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_and_floor() {
        let store = InMemoryStore::new();

        assert_eq!(store.increment(Namespace::Concurrency, "u", None).await.unwrap(), 1);
        assert_eq!(store.increment(Namespace::Concurrency, "u", None).await.unwrap(), 2);
        assert_eq!(store.decrement_floor_zero(Namespace::Concurrency, "u").await.unwrap(), 1);
        assert_eq!(store.decrement_floor_zero(Namespace::Concurrency, "u").await.unwrap(), 0);
        assert_eq!(store.decrement_floor_zero(Namespace::Concurrency, "u").await.unwrap(), 0);
        assert_eq!(
            store.decrement_floor_zero(Namespace::Concurrency, "missing").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_increment_restarts_after_expiry() {
        let store = InMemoryStore::new();
        let ttl = Some(Duration::from_millis(20));

        store.increment(Namespace::KeyHealth, "k", ttl).await.unwrap();
        store.increment(Namespace::KeyHealth, "k", ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.increment(Namespace::KeyHealth, "k", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_counter() {
        let store = InMemoryStore::new();
        store
            .set(Namespace::Rotation, "p", Bytes::from_static(b"abc"), None)
            .await
            .unwrap();

        let err = store.increment(Namespace::Rotation, "p", None).await.unwrap_err();
        assert!(matches!(err, Error::StoreProtocol { op: "increment", .. }));
    }

    #[tokio::test]
    async fn test_set_if_not_exists() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_millis(30);

        assert!(store
            .set_if_not_exists(Namespace::Leader, "lock", Bytes::from_static(b"a"), ttl)
            .await
            .unwrap());
        assert!(!store
            .set_if_not_exists(Namespace::Leader, "lock", Bytes::from_static(b"b"), ttl)
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store
            .set_if_not_exists(Namespace::Leader, "lock", Bytes::from_static(b"c"), ttl)
            .await
            .unwrap());
        assert_eq!(
            store.get(Namespace::Leader, "lock").await.unwrap(),
            Some(Bytes::from_static(b"c"))
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryStore::new();
        store.set_available(false);

        let err = store.get(Namespace::Permanent, "k").await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.ping().await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decrements_never_negative() {
        let store = Arc::new(InMemoryStore::new());

        for _round in 0..50 {
            store.increment(Namespace::Concurrency, "u", None).await.unwrap();

            let mut handles = Vec::new();
            for _ in 0..4 {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    store
                        .decrement_floor_zero(Namespace::Concurrency, "u")
                        .await
                        .unwrap()
                }));
            }
            for handle in handles {
                assert!(handle.await.unwrap() >= 0);
            }
            let raw = store.get(Namespace::Concurrency, "u").await.unwrap().unwrap();
            assert_eq!(parse_counter("t", &raw).unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_stats_and_purge() {
        let store = InMemoryStore::new();

        store
            .set(Namespace::Permanent, "a", Bytes::from_static(b"1"), None)
            .await
            .unwrap();
        store
            .set(
                Namespace::Partial,
                "b",
                Bytes::from_static(b"2"),
                Some(Duration::from_millis(5)),
            )
            .await
            .unwrap();
        store.get(Namespace::Permanent, "a").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.purge_expired(), 1);

        let stats = store.stats();
        assert_eq!(stats.key_count, 1);
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.reads, 1);
        assert_eq!(store.backend_name(), "memory");
    }
}
