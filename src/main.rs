#![deny(unused)]
//! geocache - caching, rate-limiting reverse proxy for a geocoding service.
//!
//! Bootstrap only: load configuration, set up logging and metrics, connect
//! the state store and hand a fully wired pipeline to the HTTP server.

use std::sync::Arc;

use geocache_core::config::AppConfig;
use geocache_gateway::{GatewayServer, HttpUpstream, ProxyPipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // Initialize tracing
    geocache_governance::configure_tracing(&config.logging)?;

    tracing::info!("Starting geocache v{}", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // State store (cache entries, throttle timestamp, counters)
    // =========================================================================
    let store = geocache_store::connect(&config.store).await?;

    // =========================================================================
    // Upstream + pipeline
    // =========================================================================
    let upstream = Arc::new(HttpUpstream::from_config(&config.upstream)?);
    tracing::info!(
        base_url = %config.upstream.base_url,
        min_interval_ms = config.throttle.min_interval_ms,
        throttle_mode = ?config.throttle.mode,
        cache_metadata = config.cache.cache_metadata,
        ttl_secs = config.cache.ttl_secs,
        "Upstream initialized"
    );

    let pipeline = Arc::new(ProxyPipeline::from_config(store, upstream, &config));

    // =========================================================================
    // Observability (Metrics)
    // =========================================================================
    let metrics_handle = geocache_governance::setup_metrics_recorder()?;

    // =========================================================================
    // Start the server
    // =========================================================================
    GatewayServer::new(config.server.clone().into(), pipeline)
        .with_metrics(metrics_handle)
        .run()
        .await?;

    Ok(())
}
