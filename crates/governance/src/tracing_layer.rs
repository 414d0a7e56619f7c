//! Tracing subscriber configuration.

use geocache_core::{config::LoggingConfig, Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

const DEFAULT_FILTER: &str = "info,geocache=debug";

/// Pick the filter directive: explicit config, then `RUST_LOG`, then the default.
fn filter_directive(cfg: &LoggingConfig) -> String {
    cfg.filter
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_FILTER.into())
}

/// Configure stdout logging, human-readable or JSON.
pub fn configure_tracing(cfg: &LoggingConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter_directive(cfg))
        .map_err(|e| Error::governance(format!("Invalid log filter: {}", e)))?;

    // Stdout formatting layer
    let fmt_layer = if cfg.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| Error::governance(format!("Failed to install tracing subscriber: {}", e)))?;

    Ok(())
}
