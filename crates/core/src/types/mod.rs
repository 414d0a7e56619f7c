//! Core type definitions for geocache.

pub mod cache;
pub mod fingerprint;

pub use cache::*;
pub use fingerprint::*;
