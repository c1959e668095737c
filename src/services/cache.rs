//! Dedup / Trending Cache
//!
//! Key-value store with per-key TTL, counters and sorted sets. It is the
//! only mutable medium shared by the acquisition, price and notification
//! stages; all access goes through the `Cache` contract and the key
//! builders in [`keys`].

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::{PipelineError, Result};

/// Key namespace shared by all stages
pub mod keys {
    use uuid::Uuid;

    pub const TRENDING_24H: &str = "analytics:trending:24h";
    pub const TRENDING_7D: &str = "analytics:trending:7d";
    pub const MARKET_OVERVIEW: &str = "analytics:market:overview";

    pub fn rate_limit(name: &str) -> String {
        format!("rl:{}", name)
    }

    pub fn skin_price(skin_id: Uuid) -> String {
        format!("skin:price:{}", skin_id)
    }

    pub fn hot_item(skin_id: Uuid) -> String {
        format!("hot-item:{}", skin_id)
    }

    pub fn skin_detail(slug: &str) -> String {
        format!("skin:detail:slug:{}", slug)
    }

    pub fn views(skin_id: Uuid) -> String {
        format!("analytics:views:{}", skin_id)
    }

    pub fn popular_search(query: &str) -> String {
        format!("analytics:popular:search:{}", query.trim().to_lowercase())
    }

    pub fn alert_sent(user_id: Uuid, skin_id: Uuid) -> String {
        format!("alerts:sent:{}:{}", user_id, skin_id)
    }
}

/// Lifetimes of the namespaced keys
pub mod ttl {
    use std::time::Duration;

    pub const SKIN_PRICE: Duration = Duration::from_secs(5 * 60);
    pub const TRENDING: Duration = Duration::from_secs(10 * 60);
    pub const MARKET_OVERVIEW: Duration = Duration::from_secs(10 * 60);
    pub const VIEWS: Duration = Duration::from_secs(24 * 3600);
    pub const POPULAR_SEARCH: Duration = Duration::from_secs(24 * 3600);
    pub const ALERT_SENT: Duration = Duration::from_secs(3600);
}

/// A single command of a pipelined batch
#[derive(Debug, Clone, PartialEq)]
pub enum CacheCommand {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    Incr {
        key: String,
        ttl: Option<Duration>,
    },
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    ZIncrBy {
        key: String,
        member: String,
        delta: f64,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomic increment; `first_touch_ttl` is applied only when the key is created
    async fn incr(&self, key: &str, first_touch_ttl: Option<Duration>) -> Result<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining lifetime, `None` for missing or persistent keys
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64>;

    /// Highest scores first
    async fn zrevrange(&self, key: &str, limit: usize) -> Result<Vec<(String, f64)>>;

    /// Lowest scores first
    async fn zrange(&self, key: &str, limit: usize) -> Result<Vec<(String, f64)>>;

    /// Applies all commands as one atomic batch
    async fn pipeline(&self, commands: Vec<CacheCommand>) -> Result<()>;
}

pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    cache.set(key, &raw, ttl).await
}

#[derive(Debug, Clone)]
enum CacheValue {
    Str(String),
    ZSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Sweep expired keys every this many writes
const SWEEP_EVERY_WRITES: u64 = 1024;

/// In-process cache with Redis command semantics
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    writes: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed = removed, "Purged expired cache keys");
        }
        removed
    }

    fn note_write(&self) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY_WRITES == SWEEP_EVERY_WRITES - 1 {
            self.purge_expired();
        }
    }

    fn apply(entries: &mut HashMap<String, CacheEntry>, command: CacheCommand) -> Result<()> {
        let now = Instant::now();
        match command {
            CacheCommand::Set { key, value, ttl } => {
                entries.insert(
                    key,
                    CacheEntry {
                        value: CacheValue::Str(value),
                        expires_at: ttl.map(|t| now + t),
                    },
                );
            }
            CacheCommand::Delete { key } => {
                entries.remove(&key);
            }
            CacheCommand::Incr { key, ttl } => {
                Self::incr_locked(entries, &key, ttl, now)?;
            }
            CacheCommand::ZAdd { key, member, score } => {
                Self::zset_locked(entries, &key, now)?.insert(member, score);
            }
            CacheCommand::ZIncrBy { key, member, delta } => {
                *Self::zset_locked(entries, &key, now)?.entry(member).or_insert(0.0) += delta;
            }
            CacheCommand::Expire { key, ttl } => {
                if let Some(entry) = Self::live_mut(entries, &key, now) {
                    entry.expires_at = Some(now + ttl);
                }
            }
        }
        Ok(())
    }

    fn live_mut<'a>(
        entries: &'a mut HashMap<String, CacheEntry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut CacheEntry> {
        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn incr_locked(
        entries: &mut HashMap<String, CacheEntry>,
        key: &str,
        first_touch_ttl: Option<Duration>,
        now: Instant,
    ) -> Result<i64> {
        match Self::live_mut(entries, key, now) {
            Some(entry) => match &mut entry.value {
                CacheValue::Str(raw) => {
                    let current: i64 = raw.parse().map_err(|_| {
                        PipelineError::Cache(format!("value at {} is not an integer", key))
                    })?;
                    let next = current + 1;
                    *raw = next.to_string();
                    Ok(next)
                }
                CacheValue::ZSet(_) => Err(wrong_type(key)),
            },
            None => {
                entries.insert(
                    key.to_string(),
                    CacheEntry {
                        value: CacheValue::Str("1".to_string()),
                        expires_at: first_touch_ttl.map(|t| now + t),
                    },
                );
                Ok(1)
            }
        }
    }

    fn zset_locked<'a>(
        entries: &'a mut HashMap<String, CacheEntry>,
        key: &str,
        now: Instant,
    ) -> Result<&'a mut HashMap<String, f64>> {
        if Self::live_mut(entries, key, now).is_none() {
            entries.insert(
                key.to_string(),
                CacheEntry {
                    value: CacheValue::ZSet(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match entries.get_mut(key).map(|e| &mut e.value) {
            Some(CacheValue::ZSet(set)) => Ok(set),
            _ => Err(wrong_type(key)),
        }
    }

    fn sorted_members(&self, key: &str, descending: bool, limit: usize) -> Result<Vec<(String, f64)>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut members: Vec<(String, f64)> = match Self::live_mut(&mut entries, key, now) {
            None => return Ok(Vec::new()),
            Some(entry) => match &entry.value {
                CacheValue::ZSet(set) => set.iter().map(|(m, s)| (m.clone(), *s)).collect(),
                CacheValue::Str(_) => return Err(wrong_type(key)),
            },
        };
        drop(entries);

        members.sort_by(|a, b| {
            let ord = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
            let ord = if descending { ord.reverse() } else { ord };
            // Ties broken by member for a stable order
            ord.then_with(|| a.0.cmp(&b.0))
        });
        members.truncate(limit);
        Ok(members)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> PipelineError {
    PipelineError::Cache(format!("WRONGTYPE operation against key {}", key))
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match Self::live_mut(&mut entries, key, now) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                CacheValue::Str(raw) => Ok(Some(raw.clone())),
                CacheValue::ZSet(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        trace!(key = key, "cache set");
        Self::apply(
            &mut self.entries.lock(),
            CacheCommand::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
        )?;
        self.note_write();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let existed = Self::live_mut(&mut entries, key, now).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(Self::live_mut(&mut self.entries.lock(), key, now).is_some())
    }

    async fn incr(&self, key: &str, first_touch_ttl: Option<Duration>) -> Result<i64> {
        let now = Instant::now();
        let value = Self::incr_locked(&mut self.entries.lock(), key, first_touch_ttl, now)?;
        self.note_write();
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match Self::live_mut(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(Self::live_mut(&mut entries, key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let now = Instant::now();
        Self::zset_locked(&mut self.entries.lock(), key, now)?.insert(member.to_string(), score);
        self.note_write();
        Ok(())
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let set = Self::zset_locked(&mut entries, key, now)?;
        let score = set.entry(member.to_string()).or_insert(0.0);
        *score += delta;
        let result = *score;
        drop(entries);
        self.note_write();
        Ok(result)
    }

    async fn zrevrange(&self, key: &str, limit: usize) -> Result<Vec<(String, f64)>> {
        self.sorted_members(key, true, limit)
    }

    async fn zrange(&self, key: &str, limit: usize) -> Result<Vec<(String, f64)>> {
        self.sorted_members(key, false, limit)
    }

    async fn pipeline(&self, commands: Vec<CacheCommand>) -> Result<()> {
        let mut entries = self.entries.lock();
        // Validate against a scratch copy so a failing command leaves nothing applied
        let mut scratch = entries.clone();
        for command in commands {
            Self::apply(&mut scratch, command)?;
        }
        *entries = scratch;
        drop(entries);
        self.note_write();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_set_get_with_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Some(Duration::from_millis(30))).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_first_touch_expire() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_millis(50);

        assert_eq!(cache.incr("rl:test", Some(ttl)).await.unwrap(), 1);
        assert_eq!(cache.incr("rl:test", Some(Duration::from_secs(60))).await.unwrap(), 2);
        assert_eq!(cache.incr("rl:test", Some(ttl)).await.unwrap(), 3);

        // Later increments do not extend the window
        let remaining = cache.ttl("rl:test").await.unwrap().unwrap();
        assert!(remaining <= ttl);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.incr("rl:test", Some(ttl)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let cache = MemoryCache::new();
        cache.set("k", "abc", None).await.unwrap();
        assert!(matches!(
            cache.incr("k", None).await,
            Err(PipelineError::Cache(_))
        ));
    }

    #[tokio::test]
    async fn test_sorted_set_ordering() {
        let cache = MemoryCache::new();
        cache.zadd(keys::TRENDING_24H, "a", 16.0).await.unwrap();
        cache.zadd(keys::TRENDING_24H, "b", -27.5).await.unwrap();
        cache.zadd(keys::TRENDING_24H, "c", 3.0).await.unwrap();
        cache.zadd(keys::TRENDING_24H, "a", 18.0).await.unwrap();

        let top = cache.zrevrange(keys::TRENDING_24H, 2).await.unwrap();
        assert_eq!(top, vec![("a".to_string(), 18.0), ("c".to_string(), 3.0)]);

        let bottom = cache.zrange(keys::TRENDING_24H, 10).await.unwrap();
        assert_eq!(bottom.first().unwrap().0, "b");
        assert_eq!(bottom.len(), 3);

        assert_eq!(cache.zincrby(keys::TRENDING_24H, "c", 2.0).await.unwrap(), 5.0);
        assert!(matches!(
            cache.get(keys::TRENDING_24H).await,
            Err(PipelineError::Cache(_))
        ));
    }

    #[tokio::test]
    async fn test_pipeline_is_atomic() {
        let cache = MemoryCache::new();
        cache.set("text", "x", None).await.unwrap();

        let result = cache
            .pipeline(vec![
                CacheCommand::Set {
                    key: "a".to_string(),
                    value: "1".to_string(),
                    ttl: None,
                },
                CacheCommand::Incr {
                    key: "text".to_string(),
                    ttl: None,
                },
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(cache.get("a").await.unwrap(), None);

        cache
            .pipeline(vec![
                CacheCommand::ZAdd {
                    key: "z".to_string(),
                    member: "m".to_string(),
                    score: 1.5,
                },
                CacheCommand::Expire {
                    key: "z".to_string(),
                    ttl: Duration::from_secs(600),
                },
            ])
            .await
            .unwrap();
        assert!(cache.ttl("z").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = MemoryCache::new();
        set_json(&cache, "j", &vec![1, 2, 3], None).await.unwrap();
        let back: Option<Vec<i32>> = get_json(&cache, "j").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_key_shapes() {
        let user = Uuid::nil();
        let skin = Uuid::nil();
        assert_eq!(
            keys::alert_sent(user, skin),
            format!("alerts:sent:{}:{}", user, skin)
        );
        assert_eq!(keys::rate_limit("parser:steam"), "rl:parser:steam");
        assert_eq!(keys::skin_detail("ak-47-redline"), "skin:detail:slug:ak-47-redline");
        assert_eq!(keys::popular_search(" AWP "), "analytics:popular:search:awp");
    }
}
