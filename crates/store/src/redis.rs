//! Redis implementation of StateStore.

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::time::Duration;

use geocache_core::{traits::StateStore, Error, Result};

/// Redis persistence for cache entries, throttle state and counters.
///
/// Keys are used as-is so that data written by earlier deployments of the
/// proxy stays readable.
pub struct RedisStateStore {
    client: Client,
}

impl RedisStateStore {
    /// Create a new Redis state store.
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::storage(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::storage(format!("Redis connection error: {}", e)))
    }

    /// Round-trip a PING, used at startup to fail fast.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::storage(format!("Redis ping error: {}", e)))?;
        Ok(())
    }
}

/// Deletes KEYS[1] only while it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let data: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| Error::storage(format!("Redis get error: {}", e)))?;
        Ok(data)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn().await?;

        let res: redis::RedisResult<()> = match ttl {
            Some(ttl) => conn.pset_ex(key, value, ttl_millis(ttl)).await,
            None => conn.set(key, value).await,
        };
        res.map_err(|e| Error::storage(format!("Redis set error: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| Error::storage(format!("Redis delete error: {}", e)))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        conn.exists(key)
            .await
            .map_err(|e| Error::storage(format!("Redis exists error: {}", e)))
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.conn().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        // Nil reply when the key already exists.
        let reply: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::storage(format!("Redis set_nx error: {}", e)))?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::storage(format!("Redis compare_and_delete error: {}", e)))?;
        Ok(deleted == 1)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        conn.incr(key, 1)
            .await
            .map_err(|e| Error::storage(format!("Redis incr error: {}", e)))
    }
}
