//! Cached responses and upstream results.

use bytes::Bytes;

/// Current wall-clock time as fractional unix seconds.
///
/// Timestamps are persisted in this form so every instance sharing a store
/// reads them the same way.
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A response as stored in (or read back from) the cache store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Raw upstream body.
    pub payload: Bytes,
    /// Upstream status code.
    pub status_code: u16,
    /// Upstream `Content-Type`.
    pub content_type: String,
    /// When the entry was written. Unknown for payload-only entries.
    pub cached_at: Option<f64>,
}

impl CacheEntry {
    /// Build a fresh entry from an upstream response, stamped now.
    pub fn from_upstream(response: &UpstreamResponse, fallback_content_type: &str) -> Self {
        Self {
            payload: response.body.clone(),
            status_code: response.status,
            content_type: response
                .content_type
                .clone()
                .unwrap_or_else(|| fallback_content_type.to_string()),
            cached_at: Some(unix_timestamp()),
        }
    }
}

/// What the upstream returned for a single call.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}
