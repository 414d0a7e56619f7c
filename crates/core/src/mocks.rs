//! Mock implementations of core traits for testing.
//!
//! Used by unit tests across the workspace and by the integration tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::{
    traits::{StateStore, UpstreamClient},
    types::UpstreamResponse,
    Error, Result,
};

// =============================================================================
// Mock Upstream
// =============================================================================

/// A call observed by [`MockUpstream`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path_and_query: String,
    pub headers: Vec<(String, String)>,
    /// When the call reached the upstream.
    pub at: Instant,
}

enum Reply {
    Respond(UpstreamResponse),
    Fail(String),
}

/// Scripted upstream that records every call it receives.
pub struct MockUpstream {
    reply: Mutex<Reply>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Duration,
}

impl MockUpstream {
    /// Always answer with the given status, content type and body.
    pub fn new(status: u16, content_type: &str, body: &str) -> Self {
        Self {
            reply: Mutex::new(Reply::Respond(UpstreamResponse {
                status,
                content_type: Some(content_type.to_string()),
                body: Bytes::from(body.to_string()),
            })),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// A 200 JSON response.
    pub fn json(body: &str) -> Self {
        Self::new(200, "application/json; charset=utf-8", body)
    }

    /// Fail every call as a transport error.
    pub fn failing(message: &str) -> Self {
        Self {
            reply: Mutex::new(Reply::Fail(message.to_string())),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Simulate upstream latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn call(
        &self,
        path_and_query: &str,
        headers: &[(String, String)],
    ) -> Result<UpstreamResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            path_and_query: path_and_query.to_string(),
            headers: headers.to_vec(),
            at: Instant::now(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match &*self.reply.lock().unwrap() {
            Reply::Respond(resp) => Ok(resp.clone()),
            Reply::Fail(msg) => Err(Error::upstream(msg.clone())),
        }
    }
}

// =============================================================================
// Flaky State Store
// =============================================================================

/// Wraps a store and fails reads and/or writes on demand.
pub struct FlakyStateStore {
    inner: Arc<dyn StateStore>,
    fail_reads: Mutex<bool>,
    fail_writes: Mutex<bool>,
}

impl FlakyStateStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            fail_reads: Mutex::new(false),
            fail_writes: Mutex::new(false),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap() = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    fn check_read(&self) -> Result<()> {
        if *self.fail_reads.lock().unwrap() {
            return Err(Error::storage("connection refused (mock)"));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if *self.fail_writes.lock().unwrap() {
            return Err(Error::storage("read only replica (mock)"));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FlakyStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_read()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.check_write()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_write()?;
        self.inner.delete(key).await
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        self.check_write()?;
        self.inner.set_nx(key, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.check_write()?;
        self.inner.compare_and_delete(key, expected).await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.check_write()?;
        self.inner.incr(key).await
    }
}
