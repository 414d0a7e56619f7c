//! Upstream client trait.

use async_trait::async_trait;
use crate::error::Result;
use crate::types::UpstreamResponse;

/// Issues calls to the proxied geocoding service.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Forward `path_and_query` with the given headers.
    ///
    /// Non-2xx statuses are returned as responses. Transport failures are
    /// errors and are never retried.
    async fn call(
        &self,
        path_and_query: &str,
        headers: &[(String, String)],
    ) -> Result<UpstreamResponse>;
}
