//! Throttle gate spacing outbound upstream calls.
//!
//! The last-call timestamp lives in the [`StateStore`], so every instance
//! sharing the store is throttled together and the spacing survives a
//! restart. Callers go through [`ThrottleGate::acquire`] before an upstream
//! call and [`ThrottleGate::record_call`] once it has completed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use geocache_core::{
    config::{ThrottleConfig, ThrottleMode},
    traits::StateStore,
    types::unix_timestamp,
    Result,
};

const LEASE_RETRY: Duration = Duration::from_millis(10);

/// Process- and store-wide rate limiter for upstream calls.
pub struct ThrottleGate {
    store: Arc<dyn StateStore>,
    state_key: String,
    lock_key: String,
    min_interval: Duration,
    mode: ThrottleMode,
    lock_ttl: Duration,
    /// Serializes local waiters before they contend for the store lease.
    local: Mutex<()>,
}

impl ThrottleGate {
    /// Create a relaxed gate using the default state key.
    pub fn new(store: Arc<dyn StateStore>, min_interval: Duration) -> Self {
        let defaults = ThrottleConfig::default();
        let lock_ttl = defaults.lock_ttl();
        Self {
            store,
            lock_key: lock_key(&defaults.state_key),
            state_key: defaults.state_key,
            min_interval,
            mode: defaults.mode,
            lock_ttl,
            local: Mutex::new(()),
        }
    }

    pub fn from_config(store: Arc<dyn StateStore>, cfg: &ThrottleConfig) -> Self {
        Self::new(store, cfg.min_interval())
            .with_mode(cfg.mode)
            .with_state_key(cfg.state_key.clone())
            .with_lock_ttl(cfg.lock_ttl())
    }

    pub fn with_mode(mut self, mode: ThrottleMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = key.into();
        self.lock_key = lock_key(&self.state_key);
        self
    }

    /// Lease lifetime in locked mode. Must exceed one read-compute-write of
    /// the timestamp, or another instance may take the lease mid-update.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Last recorded (or, in locked mode, reserved) upstream call.
    pub async fn last_call(&self) -> Result<Option<f64>> {
        let Some(raw) = self.store.get(&self.state_key).await? else {
            return Ok(None);
        };

        match std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|ts| ts.is_finite())
        {
            Some(ts) => Ok(Some(ts)),
            None => {
                tracing::warn!(key = %self.state_key, "Unreadable throttle timestamp, ignoring");
                Ok(None)
            }
        }
    }

    /// Suspend until the next upstream call may be issued.
    ///
    /// Returns how long the caller waited. The wait is a timer, so other
    /// requests on the runtime keep being served.
    pub async fn acquire(&self) -> Result<Duration> {
        let wait = match self.mode {
            ThrottleMode::Relaxed => {
                let last = self.last_call().await?;
                self.wait_after(last, unix_timestamp())
            }
            ThrottleMode::Locked => self.reserve_slot().await?,
        };

        if !wait.is_zero() {
            tracing::info!(
                wait_ms = wait.as_millis() as u64,
                mode = ?self.mode,
                "Waiting before sending request upstream"
            );
            tokio::time::sleep(wait).await;
        }

        Ok(wait)
    }

    /// Record that an upstream call just completed.
    ///
    /// The completion time is stored, not the start time, so slow upstream
    /// responses add to the effective spacing.
    pub async fn record_call(&self) -> Result<()> {
        match self.mode {
            ThrottleMode::Relaxed => self.write_last(unix_timestamp()).await,
            ThrottleMode::Locked => {
                let _local = self.local.lock().await;
                let token = self.lease().await?;
                let result: Result<()> = async {
                    let now = unix_timestamp();
                    // A later slot may already be reserved by another waiter.
                    let last = self.last_call().await?.map_or(now, |l| l.max(now));
                    self.write_last(last).await
                }
                .await;
                self.release(&token).await;
                result
            }
        }
    }

    fn wait_after(&self, last: Option<f64>, now: f64) -> Duration {
        let Some(last) = last else {
            return Duration::ZERO;
        };
        let wait = last + self.min_interval.as_secs_f64() - now;
        if wait <= 0.0 {
            return Duration::ZERO;
        }
        // A timestamp far in the future (clock skew on another instance)
        // never holds a caller longer than one interval.
        Duration::try_from_secs_f64(wait)
            .unwrap_or(self.min_interval)
            .min(self.min_interval)
    }

    /// Reserve the next free slot under the lock and return the wait for it.
    ///
    /// The lock covers only read-compute-write; the sleep happens after it
    /// is released.
    async fn reserve_slot(&self) -> Result<Duration> {
        let _local = self.local.lock().await;
        let token = self.lease().await?;

        let result: Result<Duration> = async {
            let now = unix_timestamp();
            let last = self.last_call().await?;
            let wait = self.wait_after(last, now);
            self.write_last(now + wait.as_secs_f64()).await?;
            Ok(wait)
        }
        .await;

        self.release(&token).await;
        result
    }

    async fn write_last(&self, ts: f64) -> Result<()> {
        self.store
            .set(&self.state_key, ts.to_string().as_bytes(), None)
            .await
    }

    /// Take the store-wide lease, waiting for other instances to release it.
    async fn lease(&self) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        loop {
            if self
                .store
                .set_nx(&self.lock_key, token.as_bytes(), Some(self.lock_ttl))
                .await?
            {
                return Ok(token);
            }
            tokio::time::sleep(LEASE_RETRY).await;
        }
    }

    async fn release(&self, token: &str) {
        match self
            .store
            .compare_and_delete(&self.lock_key, token.as_bytes())
            .await
        {
            Ok(true) => {}
            // Expired and possibly re-taken by someone else.
            Ok(false) => tracing::debug!(key = %self.lock_key, "Throttle lease already expired"),
            Err(e) => tracing::warn!(error = %e, "Failed to release throttle lease"),
        }
    }
}

fn lock_key(state_key: &str) -> String {
    format!("{}__lock", state_key)
}
