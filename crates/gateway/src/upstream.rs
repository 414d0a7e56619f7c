//! reqwest-based client for the proxied geocoding service.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};

use geocache_core::{
    config::UpstreamConfig,
    traits::UpstreamClient,
    types::UpstreamResponse,
    Error, Result,
};

/// Request headers that describe the inbound connection rather than the
/// request, and must not be replayed against the upstream.
const SKIPPED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "content-length",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-connection",
    // Bodies are cached and replayed as received, so they must arrive
    // without a content encoding.
    "accept-encoding",
];

/// Whether an inbound header is forwarded upstream.
pub fn is_forwarded(name: &str) -> bool {
    !SKIPPED_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// HTTP client for the single upstream host.
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    user_agent: Option<String>,
}

impl HttpUpstream {
    /// Create a client for `base_url` with transport defaults.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::from_config(&UpstreamConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
    }

    pub fn from_config(cfg: &UpstreamConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = cfg.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::upstream(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            user_agent: cfg.user_agent.clone(),
        })
    }

    /// Full upstream URL for an inbound path and query.
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::upstream_timeout(e.to_string())
    } else {
        Error::upstream(e.to_string())
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn call(
        &self,
        path_and_query: &str,
        headers: &[(String, String)],
    ) -> Result<UpstreamResponse> {
        let url = self.url_for(path_and_query);
        let mut request = self.client.get(&url);

        let mut has_user_agent = false;
        for (name, value) in headers.iter().filter(|(name, _)| is_forwarded(name)) {
            has_user_agent |= name.eq_ignore_ascii_case(USER_AGENT.as_str());
            request = request.header(name.as_str(), value.as_str());
        }
        if !has_user_agent {
            if let Some(ua) = &self.user_agent {
                request = request.header(USER_AGENT, ua.as_str());
            }
        }

        tracing::debug!(url = %url, "Calling upstream");
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(transport_error)?;

        tracing::debug!(url = %url, status = status, size = body.len(), "Upstream responded");

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
