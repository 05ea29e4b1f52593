//! In-process credential cache with TTL expiry

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::CredentialCache;
use crate::Result;

/// How often expired entries are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A cached value with its deadline
struct CachedEntry {
    value: String,
    expires_at: Instant,
}

impl CachedEntry {
    fn remaining(&self) -> Option<Duration> {
        self.expires_at.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
    }
}

/// Thread-safe in-memory cache
pub struct MemoryCache {
    entries: Arc<DashMap<String, CachedEntry>>,
    ttl: Duration,
}

impl MemoryCache {
    /// Create an empty cache with the given default TTL
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Number of stored entries, expired ones included until swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries, returning how many were evicted
    pub fn evict_expired(&self) -> usize {
        evict_expired(&self.entries)
    }
}

fn evict_expired(entries: &DashMap<String, CachedEntry>) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.remaining().is_some());
    before.saturating_sub(entries.len())
}

/// Remove `key` only while it is still expired; a concurrent `set` may have
/// replaced it since it was read.
fn evict_if_expired(entries: &DashMap<String, CachedEntry>, key: &str) -> bool {
    entries.remove_if(key, |_, e| e.remaining().is_none()).is_some()
}

#[async_trait]
impl CredentialCache for MemoryCache {
    /// Starts the background sweep; it stops once the cache is dropped.
    async fn init(&self) -> Result<()> {
        let entries: Weak<DashMap<String, CachedEntry>> = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let evicted = evict_expired(&entries);
                if evicted > 0 {
                    debug!(evicted, "Swept expired cache entries");
                }
            }
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.remaining().is_some() {
            return Ok(Some(entry.value.clone()));
        }
        drop(entry);
        evict_if_expired(&self.entries, key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                value: value.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get_item_ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.entries.get(key).and_then(|e| e.remaining()))
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.set("elastauth-john", "sealed").await.unwrap();

        assert_eq!(
            cache.get("elastauth-john").await.unwrap().as_deref(),
            Some("sealed")
        );
        assert_eq!(cache.get("elastauth-jane").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = MemoryCache::new(Duration::from_millis(20));
        cache.set("k", "v").await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.get_item_ttl("k").await.unwrap(), None);
        assert!(cache.is_empty(), "expired entry is evicted on read");
    }

    #[tokio::test]
    async fn item_ttl_counts_down_and_extend_resets_it() {
        let cache = MemoryCache::new(Duration::from_secs(10));
        cache.set("k", "v").await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let remaining = cache.get_item_ttl("k").await.unwrap().unwrap();
        assert!(remaining < cache.ttl());

        cache.extend_ttl("k", "v").await.unwrap();
        let extended = cache.get_item_ttl("k").await.unwrap().unwrap();
        assert!(extended > remaining);
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn expired_read_keeps_entry_rewritten_meanwhile() {
        // GIVEN: an entry that expired, then was rewritten by another request
        let cache = MemoryCache::new(Duration::from_millis(20));
        cache.set("k", "stale").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.set("k", "fresh").await.unwrap();

        // WHEN: the reader that saw the stale entry evicts it
        let evicted = evict_if_expired(&cache.entries, "k");

        // THEN: the rewritten entry survives
        assert!(!evicted);
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn evict_expired_removes_only_dead_entries() {
        let cache = MemoryCache::new(Duration::from_millis(20));
        cache.set("old", "v").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.entries.insert(
            "fresh".into(),
            CachedEntry {
                value: "v".into(),
                expires_at: Instant::now() + Duration::from_secs(60),
            },
        );

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_lose_entries() {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for i in 0..32 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.set(&format!("user-{i}"), "v").await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cache.len(), 32);
    }
}
