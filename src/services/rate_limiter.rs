//! Fixed-window request budget shared by all acquisition workers.
//!
//! A single counter per key with a TTL equal to the window, set on the first
//! increment. Counts only ever grow inside a window; once the key expires the
//! next increment starts again at 1.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::services::cache::{Cache, keys};

pub const STEAM_PARSER_KEY: &str = "parser:steam";
pub const DEFAULT_LIMIT: u64 = 60;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    key: String,
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>, name: &str, limit: u64, window: Duration) -> Self {
        Self {
            cache,
            key: keys::rate_limit(name),
            limit,
            window,
        }
    }

    /// Limiter used by the price acquisition engine (`rl:parser:steam`)
    pub fn for_parser(cache: Arc<dyn Cache>, limit_per_minute: u64) -> Self {
        Self::new(cache, STEAM_PARSER_KEY, limit_per_minute, DEFAULT_WINDOW)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Increments the window counter and returns the in-window count.
    pub async fn try_acquire(&self) -> Result<u64> {
        let count = self.cache.incr(&self.key, Some(self.window)).await?;
        Ok(count.max(0) as u64)
    }

    /// Like [`try_acquire`](Self::try_acquire), but fails with
    /// `RateLimited` once the count exceeds the limit.
    pub async fn acquire(&self) -> Result<u64> {
        let count = self.try_acquire().await?;
        if count > self.limit {
            return Err(PipelineError::RateLimited {
                key: self.key.clone(),
                count,
                limit: self.limit,
            });
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::MemoryCache;

    #[tokio::test]
    async fn test_counts_are_monotonic_within_window() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let limiter = RateLimiter::new(cache, "test", 5, Duration::from_secs(60));

        let mut last = 0;
        for _ in 0..5 {
            let count = limiter.try_acquire().await.unwrap();
            assert!(count > last);
            last = count;
        }
        assert_eq!(last, 5);
    }

    #[tokio::test]
    async fn test_acquire_rejects_over_limit() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let limiter = RateLimiter::new(cache, "test", 2, Duration::from_secs(60));

        assert_eq!(limiter.acquire().await.unwrap(), 1);
        assert_eq!(limiter.acquire().await.unwrap(), 2);
        match limiter.acquire().await {
            Err(PipelineError::RateLimited { key, count, limit }) => {
                assert_eq!(key, "rl:test");
                assert_eq!(count, 3);
                assert_eq!(limit, 2);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_window_expiry_resets_count() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let limiter = RateLimiter::new(cache, "test", 1, Duration::from_millis(40));

        assert_eq!(limiter.try_acquire().await.unwrap(), 1);
        assert_eq!(limiter.try_acquire().await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(limiter.try_acquire().await.unwrap(), 1);
    }

    #[test]
    fn test_parser_key() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let limiter = RateLimiter::for_parser(cache, DEFAULT_LIMIT);
        assert_eq!(limiter.key(), "rl:parser:steam");
        assert_eq!(limiter.limit(), 60);
    }
}
