//! Cache store adapter for upstream responses.
//!
//! Two persisted shapes are supported:
//!
//! - **split**: payload at `<key>__data`, metadata JSON at `<key>__info`.
//!   An entry is a hit only when both halves are present and readable.
//! - **payload-only**: the raw body at `<key>`, served back as a 200.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use geocache_core::{
    traits::StateStore,
    types::{CacheEntry, CacheKey},
    Result,
};

const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// Metadata half of a split entry.
#[derive(Debug, Serialize, Deserialize)]
struct CachedInfo {
    status_code: u16,
    #[serde(default)]
    headers: HashMap<String, String>,
    timestamp: f64,
}

/// Get/set of whole cache entries on top of a [`StateStore`].
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn StateStore>,
    /// Split storage when true, payload-only otherwise.
    with_metadata: bool,
    fallback_content_type: String,
}

impl ResponseCache {
    /// Create an adapter storing metadata next to the payload.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            with_metadata: true,
            fallback_content_type: "application/json; charset=utf-8".to_string(),
        }
    }

    /// Toggle split storage.
    pub fn with_metadata(mut self, enabled: bool) -> Self {
        self.with_metadata = enabled;
        self
    }

    /// Content type reported for payload-only hits.
    pub fn with_fallback_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.fallback_content_type = content_type.into();
        self
    }

    pub fn fallback_content_type(&self) -> &str {
        &self.fallback_content_type
    }

    /// Whether an upstream response with this status can be kept.
    ///
    /// Payload-only entries lose their status, so only 2xx bodies qualify.
    pub fn accepts(&self, status: u16) -> bool {
        self.with_metadata || (200..300).contains(&status)
    }

    /// Look up an entry. Store failures are errors; partial entries are misses.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        if !self.with_metadata {
            return Ok(self.store.get(key.as_str()).await?.map(|payload| CacheEntry {
                payload: Bytes::from(payload),
                status_code: 200,
                content_type: self.fallback_content_type.clone(),
                cached_at: None,
            }));
        }

        let data = self.store.get(&key.data_key()).await?;
        let info = self.store.get(&key.info_key()).await?;

        let (data, info) = match (data, info) {
            (Some(data), Some(info)) => (data, info),
            (None, None) => return Ok(None),
            (data, info) => {
                tracing::warn!(
                    key = %key,
                    has_data = data.is_some(),
                    has_info = info.is_some(),
                    "Partial cache entry, treating as miss"
                );
                return Ok(None);
            }
        };

        let info: CachedInfo = match serde_json::from_slice(&info) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Unreadable cache metadata, treating as miss");
                return Ok(None);
            }
        };

        let content_type = info
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE_HEADER))
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| self.fallback_content_type.clone());

        Ok(Some(CacheEntry {
            payload: Bytes::from(data),
            status_code: info.status_code,
            content_type,
            cached_at: Some(info.timestamp),
        }))
    }

    /// Replace the entry stored under `key`.
    pub async fn set(&self, key: &CacheKey, entry: &CacheEntry, ttl: Option<Duration>) -> Result<()> {
        if !self.with_metadata {
            return self.store.set(key.as_str(), &entry.payload, ttl).await;
        }

        let info = CachedInfo {
            status_code: entry.status_code,
            headers: HashMap::from([(
                CONTENT_TYPE_HEADER.to_string(),
                entry.content_type.clone(),
            )]),
            timestamp: entry
                .cached_at
                .unwrap_or_else(geocache_core::types::unix_timestamp),
        };
        let info = serde_json::to_vec(&info)?;

        // Payload first: a reader never sees metadata without its body.
        self.store.set(&key.data_key(), &entry.payload, ttl).await?;
        self.store.set(&key.info_key(), &info, ttl).await?;

        tracing::debug!(
            key = %key,
            status = entry.status_code,
            size = entry.payload.len(),
            ttl = ?ttl,
            "Cached upstream response"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStateStore;
    use geocache_core::types::FingerprintPolicy;

    fn key() -> CacheKey {
        let fp = FingerprintPolicy::default().fingerprint(&[("lat", "1"), ("lon", "2")]);
        CacheKey::derive("nr", &fp)
    }

    fn entry(status: u16) -> CacheEntry {
        CacheEntry {
            payload: Bytes::from_static(b"{\"place_id\":1}"),
            status_code: status,
            content_type: "application/json; charset=utf-8".to_string(),
            cached_at: Some(1_700_000_000.5),
        }
    }

    #[tokio::test]
    async fn test_split_roundtrip() {
        let store = Arc::new(InMemoryStateStore::new());
        let cache = ResponseCache::new(store.clone());

        assert!(cache.get(&key()).await.unwrap().is_none());
        cache.set(&key(), &entry(200), None).await.unwrap();

        assert!(store.exists(&key().data_key()).await.unwrap());
        assert!(store.exists(&key().info_key()).await.unwrap());
        assert_eq!(cache.get(&key()).await.unwrap(), Some(entry(200)));
    }

    #[tokio::test]
    async fn test_info_is_compatible_with_existing_data() {
        let store = Arc::new(InMemoryStateStore::new());
        store.set(&key().data_key(), b"<xml/>", None).await.unwrap();
        store
            .set(
                &key().info_key(),
                br#"{"status_code": 200, "headers": {"Content-Type": "text/xml; charset=utf-8"}, "timestamp": 1690000000.25}"#,
                None,
            )
            .await
            .unwrap();

        let hit = ResponseCache::new(store).get(&key()).await.unwrap().unwrap();
        assert_eq!(hit.content_type, "text/xml; charset=utf-8");
        assert_eq!(hit.cached_at, Some(1690000000.25));
        assert_eq!(hit.payload, Bytes::from_static(b"<xml/>"));
    }

    #[tokio::test]
    async fn test_partial_entry_is_miss() {
        let store = Arc::new(InMemoryStateStore::new());
        let cache = ResponseCache::new(store.clone());

        store.set(&key().data_key(), b"body", None).await.unwrap();
        assert!(cache.get(&key()).await.unwrap().is_none());

        store.delete(&key().data_key()).await.unwrap();
        store.set(&key().info_key(), b"{\"status_code\":200,\"timestamp\":1.0}", None).await.unwrap();
        assert!(cache.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_info_is_miss() {
        let store = Arc::new(InMemoryStateStore::new());
        store.set(&key().data_key(), b"body", None).await.unwrap();
        store.set(&key().info_key(), b"not json", None).await.unwrap();
        assert!(ResponseCache::new(store).get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_payload_only_mode() {
        let store = Arc::new(InMemoryStateStore::new());
        let cache = ResponseCache::new(store.clone())
            .with_metadata(false)
            .with_fallback_content_type("application/json");

        cache.set(&key(), &entry(200), None).await.unwrap();
        assert!(store.exists(key().as_str()).await.unwrap());
        assert!(!store.exists(&key().info_key()).await.unwrap());

        let hit = cache.get(&key()).await.unwrap().unwrap();
        assert_eq!(hit.status_code, 200);
        assert_eq!(hit.content_type, "application/json");
        assert!(hit.cached_at.is_none());

        assert!(!cache.accepts(500));
        assert!(ResponseCache::new(store).accepts(500));
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let store = Arc::new(InMemoryStateStore::new());
        let cache = ResponseCache::new(store);

        cache
            .set(&key(), &entry(200), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get(&key()).await.unwrap().is_none());
    }
}
