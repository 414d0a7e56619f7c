#![deny(unused)]
//! Persistence layer for geocache.
//!
//! This crate provides the [`StateStore`](geocache_core::traits::StateStore)
//! backends (Redis and in-memory) and the components built on them: the
//! response cache adapter, the upstream throttle gate and request counters.

pub mod memory;
pub mod redis;
pub mod response_cache;
pub mod stats;
pub mod throttle;

use std::sync::Arc;

use geocache_core::{config::StoreConfig, traits::StateStore, Result};

pub use memory::InMemoryStateStore;
pub use self::redis::RedisStateStore;
pub use response_cache::ResponseCache;
pub use stats::RequestCounters;
pub use throttle::ThrottleGate;

/// Build the configured backend: Redis when a URL is set, in-memory otherwise.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn StateStore>> {
    match &config.redis_url {
        Some(url) => {
            tracing::info!(url = %url, "Initializing Redis state store");
            let store = RedisStateStore::new(url)?;
            store.ping().await?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("No Redis URL configured - using in-memory state store");
            Ok(Arc::new(InMemoryStateStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_defaults_to_memory() {
        let store = connect(&StoreConfig::default()).await.unwrap();
        store.set("k", b"v", None).await.unwrap();
        assert!(store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let cfg = StoreConfig {
            redis_url: Some("not a url".into()),
        };
        assert!(connect(&cfg).await.is_err());
    }
}
