//! Pipeline status cache.
//!
//! Keyed cache with expiring entries, written by the orchestrator on
//! every stage transition and progress update. Every write carries a
//! TTL so a crashed orchestrator cannot leave a stale "in progress"
//! entry behind forever.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::QueueResult;

/// Default TTL for run status entries (1 hour).
pub const RUN_STATUS_TTL_SECS: u64 = 3600;

/// Keyed cache with expiring entries.
#[async_trait]
pub trait StatusCache: Send + Sync {
    /// Store `value` under `key` with a bounded time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()>;

    /// Fetch a live entry, `None` if absent or expired.
    async fn get(&self, key: &str) -> QueueResult<Option<String>>;
}

/// Redis-backed status cache.
pub struct RedisStatusCache {
    client: redis::Client,
}

impl RedisStatusCache {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn from_env() -> QueueResult<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&url)
    }
}

#[async_trait]
impl StatusCache for RedisStatusCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        debug!(key, ttl_secs = ttl.as_secs(), "status cache write");
        Ok(())
    }

    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }
}

/// In-memory status cache for tests and single-process runs.
pub struct MemoryStatusCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStatusCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStatusCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusCache for MemoryStatusCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_set_get() {
        let cache = MemoryStatusCache::new();
        cache
            .set("pipeline_status:r1", "{}", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("pipeline_status:r1").await.unwrap().as_deref(),
            Some("{}")
        );
        assert!(cache.get("pipeline_status:r2").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_cache_entries_expire() {
        let cache = MemoryStatusCache::new();
        cache
            .set("pipeline_status:r1", "{}", Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.get("pipeline_status:r1").await.unwrap().is_none());
    }
}
