//! Request pipeline: fingerprint, cache lookup, throttled upstream call,
//! persist.
//!
//! Every inbound request goes through [`ProxyPipeline::handle`] exactly once.
//! There are no retries: a hit is served from the store, a miss waits on the
//! throttle gate, calls upstream once and writes the result back.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use geocache_core::{
    config::AppConfig,
    traits::{StateStore, UpstreamClient},
    types::{CacheEntry, CacheKey, FingerprintPolicy},
    Result,
};
use geocache_governance::metrics;
use geocache_store::{RequestCounters, ResponseCache, ThrottleGate};

/// An inbound request as the pipeline sees it.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Path and query string, forwarded verbatim.
    pub path_and_query: String,
    /// Decoded query parameters in their original order.
    pub query: Vec<(String, String)>,
    /// Inbound headers.
    pub headers: Vec<(String, String)>,
}

impl ProxyRequest {
    /// Parse the query parameters out of `path_and_query`.
    pub fn new(path_and_query: impl Into<String>) -> Self {
        let path_and_query = path_and_query.into();
        let query = path_and_query
            .split_once('?')
            .map(|(_, q)| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Self {
            path_and_query,
            query,
            headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }
}

/// Where a response came from.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheStatus {
    /// Served from the store; `cached_at` is unknown for payload-only entries.
    Hit { cached_at: Option<f64> },
    /// Fetched from upstream after waiting `waited` on the throttle gate.
    Miss { waited: Duration },
}

/// Response handed back to the HTTP layer.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
    pub cache: CacheStatus,
}

impl ProxyResponse {
    fn hit(entry: CacheEntry) -> Self {
        Self {
            status: entry.status_code,
            content_type: entry.content_type,
            body: entry.payload,
            cache: CacheStatus::Hit {
                cached_at: entry.cached_at,
            },
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self.cache, CacheStatus::Hit { .. })
    }
}

/// Orchestrates cache, throttle gate and upstream for each request.
pub struct ProxyPipeline {
    policy: FingerprintPolicy,
    prefix: String,
    ttl: Option<Duration>,
    cache: ResponseCache,
    throttle: ThrottleGate,
    upstream: Arc<dyn UpstreamClient>,
    counters: Option<RequestCounters>,
    /// Per-key locks for concurrent misses, when coalescing is enabled.
    inflight: Option<DashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl ProxyPipeline {
    /// Create a pipeline with default fingerprint policy, prefix `nr` and no TTL.
    pub fn new(cache: ResponseCache, throttle: ThrottleGate, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            policy: FingerprintPolicy::default(),
            prefix: "nr".to_string(),
            ttl: None,
            cache,
            throttle,
            upstream,
            counters: None,
            inflight: None,
        }
    }

    /// Wire everything from configuration over a shared store.
    pub fn from_config(
        store: Arc<dyn StateStore>,
        upstream: Arc<dyn UpstreamClient>,
        cfg: &AppConfig,
    ) -> Self {
        let cache = ResponseCache::new(store.clone())
            .with_metadata(cfg.cache.cache_metadata)
            .with_fallback_content_type(cfg.cache.fallback_content_type.clone());
        let throttle = ThrottleGate::from_config(store.clone(), &cfg.throttle);

        Self::new(cache, throttle, upstream)
            .with_policy(FingerprintPolicy::from_config(&cfg.cache))
            .with_prefix(cfg.cache.prefix.clone())
            .with_ttl(cfg.cache.ttl())
            .with_counters(RequestCounters::new(store, cfg.stats.clone()))
            .with_coalescing(cfg.cache.coalesce_misses)
    }

    pub fn with_policy(mut self, policy: FingerprintPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_counters(mut self, counters: RequestCounters) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Serialize concurrent misses for the same key inside this process.
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.inflight = enabled.then(DashMap::new);
        self
    }

    /// Cache key for a request.
    pub fn key_for(&self, request: &ProxyRequest) -> CacheKey {
        let fingerprint = self.policy.fingerprint(request.query.as_slice());
        CacheKey::derive(&self.prefix, &fingerprint)
    }

    /// Serve one request.
    pub async fn handle(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
        if let Some(counters) = &self.counters {
            counters.record_request().await;
        }

        let key = self.key_for(request);

        if let Some(entry) = self.cache.get(&key).await? {
            tracing::debug!(key = %key, "Serving cached request");
            metrics::track_cache_lookup(true);
            return Ok(ProxyResponse::hit(entry));
        }
        metrics::track_cache_lookup(false);

        match &self.inflight {
            Some(inflight) => self.coalesced_miss(inflight, &key, request).await,
            None => self.miss(&key, request).await,
        }
    }

    async fn coalesced_miss(
        &self,
        inflight: &DashMap<CacheKey, Arc<Mutex<()>>>,
        key: &CacheKey,
        request: &ProxyRequest,
    ) -> Result<ProxyResponse> {
        let lock = inflight.entry(key.clone()).or_default().clone();

        let result = {
            let _guard = lock.lock().await;
            // Whoever held the lock before us may have filled the entry.
            match self.cache.get(key).await {
                Ok(Some(entry)) => {
                    tracing::debug!(key = %key, "Coalesced miss served from cache");
                    Ok(ProxyResponse::hit(entry))
                }
                Ok(None) => self.miss(key, request).await,
                Err(e) => Err(e),
            }
        };

        drop(lock);
        inflight.remove_if(key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn miss(&self, key: &CacheKey, request: &ProxyRequest) -> Result<ProxyResponse> {
        tracing::info!(key = %key, "Request not cached, requesting from upstream");
        if let Some(counters) = &self.counters {
            counters.record_upstream_call().await;
        }

        let waited = self.throttle.acquire().await?;
        metrics::track_throttle_wait(waited);

        let response = self
            .upstream
            .call(&request.path_and_query, &request.headers)
            .await?;
        metrics::track_upstream_call(response.status);

        if let Err(e) = self.throttle.record_call().await {
            tracing::error!(error = %e, "Failed to record upstream call time");
        }

        let entry = CacheEntry::from_upstream(&response, self.cache.fallback_content_type());
        if self.cache.accepts(entry.status_code) {
            if let Err(e) = self.cache.set(key, &entry, self.ttl).await {
                tracing::warn!(key = %key, error = %e, "Failed to persist upstream response");
                metrics::track_persist_failure();
            }
        } else {
            tracing::debug!(key = %key, status = entry.status_code, "Not caching non-success response");
        }

        Ok(ProxyResponse {
            status: entry.status_code,
            content_type: entry.content_type,
            body: entry.payload,
            cache: CacheStatus::Miss { waited },
        })
    }
}
