#![deny(unused)]
//! Observability for geocache.
//!
//! This crate provides:
//! - Tracing subscriber setup (plain or JSON logs)
//! - Prometheus metrics recorder and metric helpers

pub mod metrics;
pub mod tracing_layer;

pub use metrics::setup_metrics_recorder;
pub use tracing_layer::configure_tracing;
