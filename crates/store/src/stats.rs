//! Persisted request counters.

use std::sync::Arc;

use geocache_core::{config::StatsConfig, traits::StateStore};

/// Counts `/reverse` requests and upstream calls in the shared store.
///
/// Increments are best-effort: a failure is logged and never affects the
/// request being served.
#[derive(Clone)]
pub struct RequestCounters {
    store: Arc<dyn StateStore>,
    config: StatsConfig,
}

impl RequestCounters {
    pub fn new(store: Arc<dyn StateStore>, config: StatsConfig) -> Self {
        Self { store, config }
    }

    pub async fn record_request(&self) {
        self.bump(&self.config.request_key).await;
    }

    pub async fn record_upstream_call(&self) {
        self.bump(&self.config.upstream_key).await;
    }

    async fn bump(&self, key: &str) {
        if !self.config.enabled {
            return;
        }
        if let Err(e) = self.store.incr(key).await {
            tracing::warn!(key = key, error = %e, "Failed to increment counter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStateStore;
    use geocache_core::mocks::FlakyStateStore;

    #[tokio::test]
    async fn test_counters() {
        let store = Arc::new(InMemoryStateStore::new());
        let counters = RequestCounters::new(store.clone(), StatsConfig::default());

        counters.record_request().await;
        counters.record_request().await;
        counters.record_upstream_call().await;

        assert_eq!(store.get("request_counter").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(
            store.get("nominatim_request_counter").await.unwrap(),
            Some(b"1".to_vec())
        );
    }

    #[tokio::test]
    async fn test_disabled_and_failing_counters_are_silent() {
        let store = Arc::new(InMemoryStateStore::new());
        let disabled = StatsConfig {
            enabled: false,
            ..Default::default()
        };
        RequestCounters::new(store.clone(), disabled).record_request().await;
        assert!(store.is_empty());

        let flaky = Arc::new(FlakyStateStore::new(store));
        flaky.fail_writes(true);
        RequestCounters::new(flaky, StatsConfig::default())
            .record_upstream_call()
            .await;
    }
}
