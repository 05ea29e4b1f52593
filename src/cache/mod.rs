//! Encrypted credential cache.
//!
//! Stores the sealed password for each user under [`cache_key`]. Backends are
//! interchangeable and purely storage: the broker never learns which one it
//! talks to.
//!
//! | Backend | Scaling |
//! |---------|---------|
//! | [`MemoryCache`] | single instance |
//! | [`RedisCache`] | shared across instances |
//! | [`FileCache`] | single instance |

mod file;
mod memory;
mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

pub use file::FileCache;
pub use memory::MemoryCache;
pub use redis_store::RedisCache;

use crate::Result;
use crate::config::{CacheConfig, CacheType};

/// Prefix shared by every cache key
pub const CACHE_KEY_PREFIX: &str = "elastauth-";

/// Key-value store with per-entry TTL.
///
/// Implementations must be safe for concurrent use from many request tasks.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Establish connections or on-disk structures.
    async fn init(&self) -> Result<()>;

    /// Fetch a live entry.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write an entry with the default TTL.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remaining lifetime of a live entry.
    async fn get_item_ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Default TTL applied by [`set`](Self::set).
    fn ttl(&self) -> Duration;

    /// Reset an entry's remaining lifetime to the default TTL.
    async fn extend_ttl(&self, key: &str, value: &str) -> Result<()> {
        self.set(key, value).await
    }

    /// Backend name as used in configuration.
    fn name(&self) -> &'static str;
}

/// Cache key for a username: `elastauth-` + form-encoded username.
#[must_use]
pub fn cache_key(username: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(username.as_bytes()).collect();
    format!("{CACHE_KEY_PREFIX}{encoded}")
}

/// Build and initialise the configured backend.
pub async fn build_cache(config: &CacheConfig) -> Result<Arc<dyn CredentialCache>> {
    let cache: Arc<dyn CredentialCache> = match config.cache_type {
        CacheType::Memory => Arc::new(MemoryCache::new(config.expiration)),
        CacheType::Redis => Arc::new(
            RedisCache::connect(&config.redis_host, config.redis_db, config.expiration).await?,
        ),
        CacheType::File => Arc::new(FileCache::new(&config.path, config.expiration)),
    };

    cache.init().await?;

    match config.cache_type {
        CacheType::Memory | CacheType::File => warn!(
            cache_type = cache.name(),
            "Cache type limits horizontal scaling (single instance only)"
        ),
        CacheType::Redis => info!(
            cache_type = cache.name(),
            "Cache type supports horizontal scaling (shared Redis instance)"
        ),
    }

    Ok(cache)
}
