//! Redis-backed order cache.
//!
//! Every command runs on a clone of one multiplexed `ConnectionManager` and
//! is bounded by the configured operation timeout.

use async_trait::async_trait;
use orderflow_core::{CacheError, CacheResult};
use orderflow_storage::OrderCache;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use std::future::Future;
use std::time::Duration;

use crate::config::CacheConfig;

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisCache {
    /// Open the client and establish the managed connection.
    pub async fn connect(config: &CacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url()).map_err(unavailable)?;
        let conn = tokio::time::timeout(config.op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout {
                operation: "connect",
                timeout: config.op_timeout,
            })?
            .map_err(unavailable)?;

        tracing::info!(host = %config.host, port = config.port, db = config.db, "Connected to Redis");
        Ok(Self {
            conn,
            op_timeout: config.op_timeout,
        })
    }

    async fn run<T, F>(&self, operation: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(unavailable),
            Err(_) => Err(CacheError::Timeout {
                operation,
                timeout: self.op_timeout,
            }),
        }
    }
}

fn unavailable(err: redis::RedisError) -> CacheError {
    CacheError::Unavailable {
        reason: err.to_string(),
    }
}

#[async_trait]
impl OrderCache for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        self.run("get", async move { conn.get(key).await }).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        // SETEX rejects a zero expiry.
        let seconds = ttl.as_secs().max(1);
        self.run("set", async move { conn.set_ex(key, value, seconds).await })
            .await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        self.run("delete", async move { conn.del(key).await }).await
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _pong: String = self
            .run("ping", async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        Ok(())
    }
}
