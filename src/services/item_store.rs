//! Item Store contract
//!
//! One CRUD surface over items, price samples, watches, preferences and
//! notifications. `DbItemStore` serves it from a single pool,
//! `ShardedItemStore` from the weapon-partitioned shards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use uuid::Uuid;

use crate::entities::{notification_preferences, notifications, price_history, skins, watchlist};
use crate::error::Result;
use crate::models::notification::{NewNotification, Preferences};
use crate::models::skin::NewSkin;
use crate::models::watch::NewWatch;

/// Window of a trending ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrendPeriod {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
}

impl TrendPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendPeriod::Day => "24h",
            TrendPeriod::Week => "7d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "24h" => Some(TrendPeriod::Day),
            "7d" => Some(TrendPeriod::Week),
            _ => None,
        }
    }

    pub fn change_of(&self, skin: &skins::Model) -> Decimal {
        match self {
            TrendPeriod::Day => skin.price_change_24h,
            TrendPeriod::Week => skin.price_change_7d,
        }
    }
}

/// Analytics orderings over the item set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ranking {
    /// ABS(price_change) DESC
    Trending(TrendPeriod),
    /// price_change_24h > 0, DESC
    TopGainers,
    /// price_change_24h < 0, ASC
    TopLosers,
    /// volume_24h DESC
    MostPopular,
    /// last_updated DESC
    RecentlyUpdated,
}

impl Ranking {
    pub fn admits(&self, skin: &skins::Model) -> bool {
        match self {
            Ranking::TopGainers => skin.price_change_24h > Decimal::ZERO,
            Ranking::TopLosers => skin.price_change_24h < Decimal::ZERO,
            Ranking::RecentlyUpdated => skin.last_updated.is_some(),
            _ => true,
        }
    }

    pub fn compare(&self, a: &skins::Model, b: &skins::Model) -> Ordering {
        let ord = match self {
            Ranking::Trending(period) => period.change_of(b).abs().cmp(&period.change_of(a).abs()),
            Ranking::TopGainers => b.price_change_24h.cmp(&a.price_change_24h),
            Ranking::TopLosers => a.price_change_24h.cmp(&b.price_change_24h),
            Ranking::MostPopular => b.volume_24h.cmp(&a.volume_24h),
            Ranking::RecentlyUpdated => b.last_updated.cmp(&a.last_updated),
        };
        ord.then_with(|| a.market_hash_name.cmp(&b.market_hash_name))
    }

    /// Merge step for scatter reads: filter, re-sort globally, re-limit.
    pub fn merge(&self, mut rows: Vec<skins::Model>, limit: u64) -> Vec<skins::Model> {
        rows.retain(|s| self.admits(s));
        rows.sort_by(|a, b| self.compare(a, b));
        rows.truncate(limit as usize);
        rows
    }
}

/// Result of a transactional price update
#[derive(Debug, Clone, PartialEq)]
pub struct PriceChange {
    /// Row after the update
    pub skin: skins::Model,
    pub old_price: Decimal,
    pub new_price: Decimal,
    /// Signed percent change, 0 when there was no previous price
    pub change: Decimal,
}

/// Input for AppendPriceSample
#[derive(Debug, Clone, PartialEq)]
pub struct NewPriceSample {
    pub skin_id: Uuid,
    pub price: Decimal,
    pub volume: i64,
    pub source: String,
}

/// Reachability of one physical store
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub name: String,
    pub healthy: bool,
}

#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Idempotent ingest: a unique conflict on hash name or slug resolves
    /// to an update of the existing row.
    async fn create_item(&self, item: NewSkin) -> Result<skins::Model>;

    /// Refresh descriptive fields; prices are owned by `update_item_price`.
    async fn update_item(&self, id: Uuid, item: NewSkin) -> Result<skins::Model>;

    async fn get_by_id(&self, id: Uuid) -> Result<skins::Model>;

    async fn get_by_hash_name(&self, market_hash_name: &str) -> Result<skins::Model>;

    async fn get_by_slug(&self, slug: &str) -> Result<skins::Model>;

    async fn list_all(&self) -> Result<Vec<skins::Model>>;

    async fn count(&self) -> Result<u64>;

    async fn search(&self, query: &str, limit: u64) -> Result<Vec<skins::Model>>;

    /// Read old price, update the row and append a sample in one transaction.
    async fn update_item_price(
        &self,
        id: Uuid,
        price: Decimal,
        volume: i64,
        source: &str,
    ) -> Result<PriceChange>;

    async fn append_price_sample(&self, sample: NewPriceSample) -> Result<price_history::Model>;

    /// Most recent first
    async fn price_history(&self, skin_id: Uuid, limit: u64) -> Result<Vec<price_history::Model>>;

    async fn get_active_watches_by_item(&self, skin_id: Uuid) -> Result<Vec<watchlist::Model>>;

    async fn upsert_watch(&self, watch: NewWatch) -> Result<watchlist::Model>;

    /// Soft delete; returns whether an active watch existed
    async fn deactivate_watch(&self, user_id: Uuid, skin_id: Uuid) -> Result<bool>;

    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<notification_preferences::Model>>;

    async fn upsert_preferences(
        &self,
        user_id: Uuid,
        preferences: Preferences,
    ) -> Result<notification_preferences::Model>;

    async fn create_notification(&self, notification: NewNotification) -> Result<notifications::Model>;

    async fn list_notifications(&self, user_id: Uuid, limit: u64) -> Result<Vec<notifications::Model>>;

    async fn mark_notification_read(&self, id: Uuid) -> Result<notifications::Model>;

    async fn ranked(&self, ranking: Ranking, limit: u64) -> Result<Vec<skins::Model>>;

    async fn trending(&self, period: TrendPeriod, limit: u64) -> Result<Vec<skins::Model>> {
        self.ranked(Ranking::Trending(period), limit).await
    }

    async fn top_gainers(&self, limit: u64) -> Result<Vec<skins::Model>> {
        self.ranked(Ranking::TopGainers, limit).await
    }

    async fn top_losers(&self, limit: u64) -> Result<Vec<skins::Model>> {
        self.ranked(Ranking::TopLosers, limit).await
    }

    async fn most_popular(&self, limit: u64) -> Result<Vec<skins::Model>> {
        self.ranked(Ranking::MostPopular, limit).await
    }

    async fn recently_updated(&self, limit: u64) -> Result<Vec<skins::Model>> {
        self.ranked(Ranking::RecentlyUpdated, limit).await
    }

    /// Retention: delete samples recorded before `older_than`
    async fn purge_price_history(&self, older_than: DateTime<Utc>) -> Result<u64>;

    async fn health(&self) -> Vec<StoreHealth>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn skin(name: &str, change_24h: Decimal, volume: i64) -> skins::Model {
        let now = Utc::now().fixed_offset();
        skins::Model {
            id: Uuid::new_v4(),
            market_hash_name: name.to_string(),
            slug: name.to_lowercase(),
            name: name.to_string(),
            weapon: "AK-47".to_string(),
            quality: "Field-Tested".to_string(),
            rarity: "Classified".to_string(),
            image_url: None,
            current_price: dec!(1),
            currency: "USD".to_string(),
            volume_24h: volume,
            price_change_24h: change_24h,
            price_change_7d: Decimal::ZERO,
            lowest_price: dec!(1),
            highest_price: dec!(1),
            last_updated: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_trending_merge_orders_by_absolute_change() {
        let rows = vec![skin("a", dec!(3), 1), skin("b", dec!(-12), 1), skin("c", dec!(7), 1)];
        let merged = Ranking::Trending(TrendPeriod::Day).merge(rows, 2);
        let names: Vec<_> = merged.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_gainers_and_losers_filter_by_sign() {
        let rows = vec![skin("a", dec!(3), 1), skin("b", dec!(-12), 1), skin("c", dec!(7), 1), skin("d", dec!(-1), 1)];

        let gainers = Ranking::TopGainers.merge(rows.clone(), 10);
        let names: Vec<_> = gainers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a"]);

        let losers = Ranking::TopLosers.merge(rows, 10);
        let names: Vec<_> = losers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "d"]);
    }

    #[test]
    fn test_most_popular_by_volume() {
        let rows = vec![skin("a", dec!(0), 10), skin("b", dec!(0), 1397), skin("c", dec!(0), 50)];
        let merged = Ranking::MostPopular.merge(rows, 1);
        assert_eq!(merged[0].name, "b");
    }

    #[test]
    fn test_trend_period_parse() {
        assert_eq!(TrendPeriod::parse("24h"), Some(TrendPeriod::Day));
        assert_eq!(TrendPeriod::parse("7d"), Some(TrendPeriod::Week));
        assert_eq!(TrendPeriod::parse("1y"), None);
        assert_eq!(TrendPeriod::Week.as_str(), "7d");
    }
}
