//! Collaborator traits consumed by the proxy pipeline.
//!
//! - `state_store`: key/value backend with TTL (cache entries, throttle state, counters)
//! - `upstream`: the geocoding service being proxied

pub mod state_store;
pub mod upstream;

pub use state_store::*;
pub use upstream::*;
