//! Axum-based HTTP server for the proxy.

use axum::{
    extract::State,
    http::{
        header::{HeaderName, HeaderValue, CONTENT_TYPE},
        HeaderMap, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use geocache_core::{config::ServerConfig, Error, Result};
use geocache_governance::metrics;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::pipeline::{CacheStatus, ProxyPipeline, ProxyRequest, ProxyResponse};

/// Set on responses served from the cache.
pub const CACHED_RESPONSE_HEADER: &str = "x-cached-response";
/// When the cached entry was written, in unix seconds.
pub const CACHE_TIMESTAMP_HEADER: &str = "x-cache-timestamp";

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Enable CORS.
    pub enable_cors: bool,
    /// Enable request tracing.
    pub enable_tracing: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        ServerConfig::default().into()
    }
}

impl From<ServerConfig> for GatewayConfig {
    fn from(cfg: ServerConfig) -> Self {
        Self {
            host: cfg.host,
            port: cfg.port,
            enable_cors: cfg.enable_cors,
            enable_tracing: cfg.enable_tracing,
        }
    }
}

/// Shared application state.
pub struct AppState {
    /// Request pipeline.
    pub pipeline: Arc<ProxyPipeline>,
}

/// Gateway server.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(config: GatewayConfig, pipeline: Arc<ProxyPipeline>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { pipeline }),
            metrics_handle: None,
        }
    }

    /// Set metrics handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(home_handler))
            .route("/reverse", get(reverse_handler))
            .with_state(self.state.clone());

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        if self.config.enable_cors {
            router = router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any));
        }

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Run the server until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the server until `shutdown` resolves, letting in-flight requests finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::gateway(format!("Failed to bind: {}", e)))?;

        tracing::info!(addr = %addr, "Gateway server starting");

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::gateway(format!("Server error: {}", e)))?;

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

// =============================================================================
// Response Types
// =============================================================================

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Trace ID.
    pub trace_id: Option<String>,
}

/// HTTP status reported for a failed request.
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Upstream(_) => StatusCode::BAD_GATEWAY,
        Error::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &Error, trace_id: String) -> Response {
    (
        status_for(error),
        Json(ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
            trace_id: Some(trace_id),
        }),
    )
        .into_response()
}

fn proxy_response(resp: ProxyResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, resp.body).into_response();
    let headers = response.headers_mut();

    match HeaderValue::from_str(&resp.content_type) {
        Ok(value) => {
            headers.insert(CONTENT_TYPE, value);
        }
        Err(_) => tracing::warn!(content_type = %resp.content_type, "Dropping invalid content type"),
    }

    if let CacheStatus::Hit { cached_at } = resp.cache {
        headers.insert(
            HeaderName::from_static(CACHED_RESPONSE_HEADER),
            HeaderValue::from_static("True"),
        );
        if let Some(ts) = cached_at.and_then(|ts| HeaderValue::from_str(&ts.to_string()).ok()) {
            headers.insert(HeaderName::from_static(CACHE_TIMESTAMP_HEADER), ts);
        }
    }

    response
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

// =============================================================================
// Handlers
// =============================================================================

/// Liveness probe.
async fn home_handler() -> &'static str {
    "ok"
}

/// Reverse geocoding, served from cache or a throttled upstream call.
async fn reverse_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let request = ProxyRequest::new(path_and_query).with_headers(header_pairs(&headers));

    let response = match state.pipeline.handle(&request).await {
        Ok(resp) => {
            tracing::debug!(
                trace_id = %trace_id,
                status = resp.status,
                cached = resp.is_hit(),
                "Reverse request served"
            );
            proxy_response(resp)
        }
        Err(e) => {
            tracing::error!(trace_id = %trace_id, error = %e, "Reverse request failed");
            error_response(&e, trace_id)
        }
    };

    metrics::track_request(
        "GET",
        "/reverse",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}
