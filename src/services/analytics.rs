//! Hot-item and trending projections
//!
//! Reads the cache projections maintained by the price consumer and falls
//! back to the store analytics reads when a projection is missing.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::skins;
use crate::error::Result;
use crate::services::cache::{self, Cache, keys, ttl};
use crate::services::item_store::{ItemRepository, TrendPeriod};

/// Value stored under `skin:price:{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPrice {
    pub price: f64,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
    pub source: String,
    pub volume: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingEntry {
    pub skin_id: Uuid,
    /// Signed percent change
    pub score: f64,
}

impl TrendingEntry {
    fn from_skin(skin: &skins::Model, period: TrendPeriod) -> Self {
        Self {
            skin_id: skin.id,
            score: period.change_of(skin).to_f64().unwrap_or(0.0),
        }
    }
}

/// Value stored under `analytics:market:overview`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOverview {
    pub total_items: u64,
    pub average_abs_change_24h: f64,
    pub gainers: u64,
    pub losers: u64,
    pub generated_at: DateTime<Utc>,
}

pub fn trending_key(period: TrendPeriod) -> &'static str {
    match period {
        TrendPeriod::Day => keys::TRENDING_24H,
        TrendPeriod::Week => keys::TRENDING_7D,
    }
}

fn parse_members(members: Vec<(String, f64)>) -> Vec<TrendingEntry> {
    members
        .into_iter()
        .filter_map(|(member, score)| {
            Uuid::parse_str(&member)
                .ok()
                .map(|skin_id| TrendingEntry { skin_id, score })
        })
        .collect()
}

#[derive(Clone)]
pub struct AnalyticsService {
    cache: Arc<dyn Cache>,
    store: Arc<dyn ItemRepository>,
}

impl AnalyticsService {
    pub fn new(cache: Arc<dyn Cache>, store: Arc<dyn ItemRepository>) -> Self {
        Self { cache, store }
    }

    pub async fn cached_price(&self, skin_id: Uuid) -> Result<Option<CachedPrice>> {
        cache::get_json(self.cache.as_ref(), &keys::skin_price(skin_id)).await
    }

    /// Ranked by absolute change, highest first
    pub async fn trending(&self, period: TrendPeriod, limit: usize) -> Result<Vec<TrendingEntry>> {
        // Largest absolute moves sit at either end of the signed ranking
        let mut entries = parse_members(self.cache.zrevrange(trending_key(period), limit).await?);
        entries.extend(parse_members(self.cache.zrange(trending_key(period), limit).await?));
        entries.sort_by(|a, b| {
            b.score
                .abs()
                .partial_cmp(&a.score.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut seen = HashSet::new();
        entries.retain(|e| seen.insert(e.skin_id));

        if entries.is_empty() {
            debug!(period = period.as_str(), "Trending projection empty, reading store");
            let rows = self.store.trending(period, limit as u64).await?;
            return Ok(rows.iter().map(|s| TrendingEntry::from_skin(s, period)).collect());
        }

        entries.truncate(limit);
        Ok(entries)
    }

    /// Signed score descending, positive only
    pub async fn top_gainers(&self, limit: usize) -> Result<Vec<TrendingEntry>> {
        let entries: Vec<TrendingEntry> = parse_members(self.cache.zrevrange(keys::TRENDING_24H, limit).await?)
            .into_iter()
            .filter(|e| e.score > 0.0)
            .collect();
        if !entries.is_empty() {
            return Ok(entries);
        }
        let rows = self.store.top_gainers(limit as u64).await?;
        Ok(rows.iter().map(|s| TrendingEntry::from_skin(s, TrendPeriod::Day)).collect())
    }

    /// Signed score ascending, negative only
    pub async fn top_losers(&self, limit: usize) -> Result<Vec<TrendingEntry>> {
        let entries: Vec<TrendingEntry> = parse_members(self.cache.zrange(keys::TRENDING_24H, limit).await?)
            .into_iter()
            .filter(|e| e.score < 0.0)
            .collect();
        if !entries.is_empty() {
            return Ok(entries);
        }
        let rows = self.store.top_losers(limit as u64).await?;
        Ok(rows.iter().map(|s| TrendingEntry::from_skin(s, TrendPeriod::Day)).collect())
    }

    pub async fn market_overview(&self) -> Result<MarketOverview> {
        match cache::get_json::<MarketOverview>(self.cache.as_ref(), keys::MARKET_OVERVIEW).await {
            Ok(Some(overview)) => return Ok(overview),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Market overview cache read failed"),
        }

        let items = self.store.list_all().await?;
        let changes: Vec<f64> = items
            .iter()
            .map(|s| s.price_change_24h.to_f64().unwrap_or(0.0))
            .collect();
        let overview = MarketOverview {
            total_items: items.len() as u64,
            average_abs_change_24h: if changes.is_empty() {
                0.0
            } else {
                changes.iter().map(|c| c.abs()).sum::<f64>() / changes.len() as f64
            },
            gainers: changes.iter().filter(|c| **c > 0.0).count() as u64,
            losers: changes.iter().filter(|c| **c < 0.0).count() as u64,
            generated_at: Utc::now(),
        };

        if let Err(e) = cache::set_json(
            self.cache.as_ref(),
            keys::MARKET_OVERVIEW,
            &overview,
            Some(ttl::MARKET_OVERVIEW),
        )
        .await
        {
            warn!(error = %e, "Failed to cache market overview");
        }

        Ok(overview)
    }

    pub async fn record_view(&self, skin_id: Uuid) -> Result<i64> {
        self.cache.incr(&keys::views(skin_id), Some(ttl::VIEWS)).await
    }

    pub async fn record_search(&self, query: &str) -> Result<i64> {
        self.cache
            .incr(&keys::popular_search(query), Some(ttl::POPULAR_SEARCH))
            .await
    }

    /// Drops the slug-keyed detail projection
    pub async fn invalidate_skin_detail(&self, slug: &str) -> Result<bool> {
        self.cache.delete(&keys::skin_detail(slug)).await
    }
}
