use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Two years, the retention the public instance has always used.
const DEFAULT_TTL_SECS: u64 = 60 * 60 * 24 * 365 * 2;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub throttle: ThrottleConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub stats: StatsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub enable_tracing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            enable_cors: true,
            enable_tracing: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// No timeout unless set; only the throttle wait is bounded by default.
    pub timeout_ms: Option<u64>,
    /// Sent only when the client did not provide its own User-Agent.
    pub user_agent: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".into(),
            timeout_ms: None,
            user_agent: None,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// How concurrent misses interact with the shared throttle timestamp.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleMode {
    /// Unsynchronized read-compute-sleep. Concurrent misses may both pass.
    #[default]
    Relaxed,
    /// Slots are reserved under a lock, so spacing holds under concurrency.
    Locked,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ThrottleConfig {
    pub min_interval_ms: u64,
    pub mode: ThrottleMode,
    pub state_key: String,
    pub lock_ttl_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 2000,
            mode: ThrottleMode::Relaxed,
            state_key: "LAST_NOMINATIM_REQUEST".into(),
            lock_ttl_ms: 5000,
        }
    }
}

impl ThrottleConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub prefix: String,
    /// `0` disables expiry.
    pub ttl_secs: u64,
    /// Store status, content type and timestamp next to the payload.
    pub cache_metadata: bool,
    pub fields: Vec<String>,
    pub language_field: String,
    pub default_language: String,
    /// Content type for hits served in payload-only mode.
    pub fallback_content_type: String,
    pub coalesce_misses: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "nr".into(),
            ttl_secs: DEFAULT_TTL_SECS,
            cache_metadata: true,
            fields: crate::types::DEFAULT_CACHE_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            language_field: "accept-language".into(),
            default_language: "en-us".into(),
            fallback_content_type: "application/json; charset=utf-8".into(),
            coalesce_misses: false,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// In-memory store when unset.
    pub redis_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StatsConfig {
    pub enabled: bool,
    pub request_key: String,
    pub upstream_key: String,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_key: "request_counter".into(),
            upstream_key: "nominatim_request_counter".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    /// Falls back to `RUST_LOG`, then `info,geocache=debug`.
    pub filter: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("GEOCACHE_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map GEOCACHE__SERVER__PORT=3000 to server.port
            .add_source(
                Environment::with_prefix("GEOCACHE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: Self = s.try_deserialize()?;
        cfg.apply_legacy_env(std::env::var("REDIS_HOST").ok());
        Ok(cfg)
    }

    /// Older deployments only set `REDIS_HOST`.
    fn apply_legacy_env(&mut self, redis_host: Option<String>) {
        if self.store.redis_url.is_none() {
            if let Some(host) = redis_host.filter(|h| !h.is_empty()) {
                self.store.redis_url = Some(format!("redis://{}:6379/0", host));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.throttle.min_interval(), Duration::from_secs(2));
        assert_eq!(cfg.throttle.mode, ThrottleMode::Relaxed);
        assert_eq!(cfg.cache.ttl(), Some(Duration::from_secs(DEFAULT_TTL_SECS)));
        assert_eq!(cfg.cache.fields.len(), 14);
        assert!(cfg.upstream.timeout().is_none());
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        let cache = CacheConfig {
            ttl_secs: 0,
            ..Default::default()
        };
        assert!(cache.ttl().is_none());
    }

    #[test]
    fn test_legacy_redis_host() {
        let mut cfg = AppConfig::default();
        cfg.apply_legacy_env(Some("redis".into()));
        assert_eq!(cfg.store.redis_url.as_deref(), Some("redis://redis:6379/0"));

        let mut explicit = AppConfig::default();
        explicit.store.redis_url = Some("redis://cache:6380".into());
        explicit.apply_legacy_env(Some("redis".into()));
        assert_eq!(explicit.store.redis_url.as_deref(), Some("redis://cache:6380"));
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let cfg: AppConfig = Config::builder()
            .add_source(config::File::from_str(
                "[throttle]\nmode = \"locked\"\nmin_interval_ms = 500\n[cache]\nttl_secs = 0\ncache_metadata = false\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.throttle.mode, ThrottleMode::Locked);
        assert_eq!(cfg.throttle.min_interval_ms, 500);
        assert_eq!(cfg.throttle.state_key, "LAST_NOMINATIM_REQUEST");
        assert!(!cfg.cache.cache_metadata);
        assert!(cfg.cache.ttl().is_none());
        assert_eq!(cfg.server.port, 5000);
    }
}
