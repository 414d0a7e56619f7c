//! Error types for geocache.

use thiserror::Error;

/// Result type alias using geocache's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for geocache.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Gateway Errors
    // =========================================================================
    #[error("Gateway error: {0}")]
    Gateway(String),

    // =========================================================================
    // Upstream Errors
    // =========================================================================
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Observability Errors
    // =========================================================================
    #[error("Governance error: {0}")]
    Governance(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a gateway error.
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }

    /// Create an upstream error.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create an upstream timeout error.
    pub fn upstream_timeout(msg: impl Into<String>) -> Self {
        Self::UpstreamTimeout(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a governance error.
    pub fn governance(msg: impl Into<String>) -> Self {
        Self::Governance(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short machine-readable code, used in error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Upstream(_) => "UPSTREAM_UNAVAILABLE",
            Self::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            Self::Storage(_) => "CACHE_STORE_UNAVAILABLE",
            Self::Governance(_) => "GOVERNANCE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::upstream("refused").code(), "UPSTREAM_UNAVAILABLE");
        assert_eq!(Error::storage("down").code(), "CACHE_STORE_UNAVAILABLE");
        assert_eq!(
            Error::upstream_timeout("slow").to_string(),
            "Upstream timeout: slow"
        );
    }
}
