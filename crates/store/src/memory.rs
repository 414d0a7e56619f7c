//! In-memory state store implementation using DashMap.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use geocache_core::{traits::StateStore, Error, Result};

/// Stored value with optional expiry.
#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: &[u8], ttl: Option<Duration>) -> Self {
        Self {
            data: data.to_vec(),
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory state store using DashMap for concurrent access.
///
/// Suitable for a single instance and for tests. Nothing survives a restart,
/// and instances do not share throttle state; use Redis for that.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    data: DashMap<String, StoredValue>,
}

impl InMemoryStateStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) keys.
    pub fn len(&self) -> usize {
        self.data.iter().filter(|r| !r.is_expired()).count()
    }

    /// Check if the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.data.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.data.clone()));
            }
            drop(entry);
            self.data.remove_if(key, |_, v| v.is_expired());
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        tracing::trace!(key = key, size = value.len(), ttl = ?ttl, "Storing value in memory");
        self.data.insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        Ok(self
            .data
            .remove_if(key, |_, v| !v.is_expired() && v.data == expected)
            .is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::new(b"0", None));

        if entry.is_expired() {
            *entry = StoredValue::new(b"0", None);
        }

        let current: i64 = std::str::from_utf8(&entry.data)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::storage(format!("Value at '{}' is not an integer", key)))?;

        let next = current + 1;
        entry.data = next.to_string().into_bytes();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryStateStore::new();
        store.set("k", b"v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = InMemoryStateStore::new();
        store
            .set("short", b"v", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(store.exists("short").await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_nx() {
        let store = InMemoryStateStore::new();
        assert!(store.set_nx("lock", b"a", None).await.unwrap());
        assert!(!store.set_nx("lock", b"b", None).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some(b"a".to_vec()));

        store.delete("lock").await.unwrap();
        assert!(store.set_nx("lock", b"c", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_nx_over_expired() {
        let store = InMemoryStateStore::new();
        assert!(store
            .set_nx("lease", b"a", Some(Duration::from_millis(10)))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.set_nx("lease", b"b", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let store = InMemoryStateStore::new();
        store.set("lease", b"mine", None).await.unwrap();

        assert!(!store.compare_and_delete("lease", b"theirs").await.unwrap());
        assert!(store.exists("lease").await.unwrap());
        assert!(store.compare_and_delete("lease", b"mine").await.unwrap());
        assert!(!store.exists("lease").await.unwrap());
        assert!(!store.compare_and_delete("lease", b"mine").await.unwrap());
    }

    #[tokio::test]
    async fn test_incr() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.incr("hits").await.unwrap(), 1);
        assert_eq!(store.incr("hits").await.unwrap(), 2);
        assert_eq!(store.get("hits").await.unwrap(), Some(b"2".to_vec()));

        store.set("text", b"abc", None).await.unwrap();
        assert!(store.incr("text").await.is_err());
    }
}
