#![deny(unused)]
//! Core types, traits, and error definitions for geocache.
//!
//! This crate provides the pieces shared by the store, gateway and binary:
//! request fingerprinting, cache keys, configuration and the collaborator
//! traits the proxy pipeline is built on.

pub mod config;
pub mod error;
pub mod mocks;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
