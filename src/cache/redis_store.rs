//! Redis-backed credential cache shared between instances

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::CredentialCache;
use crate::{Error, Result};

/// Cache on a shared Redis instance using native key expiry
pub struct RedisCache {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisCache {
    /// Connect to `host` (`host:port`) and select database `db`.
    pub async fn connect(host: &str, db: u8, ttl: Duration) -> Result<Self> {
        let url = redis_url(host, db);
        let client = redis::Client::open(url.as_str())
            .map_err(|e| Error::Config(format!("invalid redis address {host}: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Cache(format!("failed to connect to redis at {host}: {e}")))?;
        Ok(Self { conn, ttl })
    }
}

fn redis_url(host: &str, db: u8) -> String {
    if host.starts_with("redis://") || host.starts_with("rediss://") {
        format!("{}/{db}", host.trim_end_matches('/'))
    } else {
        format!("redis://{host}/{db}")
    }
}

fn cache_err(e: &redis::RedisError) -> Error {
    Error::Cache(format!("redis: {e}"))
}

#[async_trait]
impl CredentialCache for RedisCache {
    async fn init(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_err(&e))?;
        debug!(reply = %pong, "Redis cache reachable");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| cache_err(&e))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, self.ttl.as_secs().max(1))
            .await
            .map_err(|e| cache_err(&e))
    }

    async fn get_item_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        // -2: no such key, -1: no expiry
        let secs: i64 = conn.ttl(key).await.map_err(|e| cache_err(&e))?;
        Ok(u64::try_from(secs).ok().map(Duration::from_secs))
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_from_host_and_db() {
        assert_eq!(redis_url("localhost:6379", 0), "redis://localhost:6379/0");
        assert_eq!(redis_url("cache.internal:6380", 15), "redis://cache.internal:6380/15");
        assert_eq!(redis_url("redis://cache:6379/", 3), "redis://cache:6379/3");
    }
}
