#![deny(unused)]
//! HTTP gateway for geocache.
//!
//! This crate provides the client-facing axum server, the request pipeline
//! that decides between cache and upstream, and the reqwest client used to
//! reach the geocoding service.

pub mod pipeline;
pub mod server;
pub mod upstream;

pub use pipeline::{CacheStatus, ProxyPipeline, ProxyRequest, ProxyResponse};
pub use server::{GatewayConfig, GatewayServer};
pub use upstream::HttpUpstream;
