//! Filesystem-backed credential cache.
//!
//! One JSON file per key holding the value and its absolute expiry. Writes go
//! to a temporary file that is renamed into place, so readers never observe a
//! partially written entry.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use super::CredentialCache;
use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    value: String,
    /// Unix time in milliseconds
    expires_at: u64,
}

/// Cache storing entries as files under a directory
pub struct FileCache {
    dir: PathBuf,
    ttl: Duration,
}

impl FileCache {
    /// Create a cache rooted at `dir`
    #[must_use]
    pub fn new(dir: impl AsRef<Path>, ttl: Duration) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            ttl,
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // cache_key() form-encodes separators; keep raw keys inside the directory too.
        let safe: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    async fn read_entry(&self, key: &str) -> Result<Option<FileEntry>> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Cache(format!("read {}: {e}", path.display()))),
        };

        let Ok(entry) = serde_json::from_slice::<FileEntry>(&raw) else {
            warn!(path = %path.display(), "Discarding unreadable cache file");
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        };

        if entry.expires_at <= now_millis() {
            debug!(key, "Cache file expired");
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[async_trait]
impl CredentialCache for FileCache {
    async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::Config(format!("cannot create cache directory {}: {e}", self.dir.display()))
        })?;

        // Writability probe
        let probe = self.dir.join(".elastauth-write-test");
        fs::write(&probe, b"ok").await.map_err(|e| {
            Error::Config(format!("cache directory {} is not writable: {e}", self.dir.display()))
        })?;
        let _ = fs::remove_file(&probe).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_entry(key).await?.map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        let entry = FileEntry {
            value: value.to_string(),
            expires_at: now_millis().saturating_add(ttl_ms),
        };
        let body = serde_json::to_vec(&entry)?;

        let path = self.entry_path(key);
        let tmp = path.with_extension(format!("tmp-{:016x}", rand::random::<u64>()));
        fs::write(&tmp, body)
            .await
            .map_err(|e| Error::Cache(format!("write {}: {e}", tmp.display())))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Cache(format!("rename {}: {e}", path.display())));
        }
        Ok(())
    }

    async fn get_item_ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self
            .read_entry(key)
            .await?
            .map(|e| Duration::from_millis(e.expires_at.saturating_sub(now_millis()))))
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
