//! Item Store over weapon shards
//!
//! Item-scoped rows (skins, price history, watches) live on the item's
//! shard. User-scoped rows (preferences, notifications) are not
//! weapon-partitioned and live on the primary pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::{notification_preferences, notifications, price_history, skins, watchlist};
use crate::error::{PipelineError, Result};
use crate::models::notification::{NewNotification, Preferences};
use crate::models::skin::NewSkin;
use crate::models::watch::NewWatch;
use crate::services::item_store::{
    ItemRepository, NewPriceSample, PriceChange, Ranking, StoreHealth,
};
use crate::services::shard_router::{SHARD_COUNT, ShardRouter, WeaponFamily};
use crate::services::skin_queries as q;

#[derive(Clone)]
pub struct ShardedItemStore {
    router: ShardRouter,
    primary: DatabaseConnection,
}

impl ShardedItemStore {
    pub fn new(router: ShardRouter, primary: DatabaseConnection) -> Self {
        Self { router, primary }
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Row on any shard sharing `item`'s hash name or slug
    async fn find_conflicting(&self, item: &NewSkin) -> Result<Option<(WeaponFamily, skins::Model)>> {
        let lookup = item.clone();
        match self
            .router
            .find_first(&item.market_hash_name, |db| {
                let lookup = lookup.clone();
                async move { q::find_conflicting(&db, &lookup).await }
            })
            .await
        {
            Ok(hit) => Ok(Some(hit)),
            Err(PipelineError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ItemRepository for ShardedItemStore {
    /// Hash name and slug are unique across all shards: an existing row is
    /// updated where it lives, whatever weapon the caller supplies.
    async fn create_item(&self, item: NewSkin) -> Result<skins::Model> {
        let (family, shard) = self.router.shard_for_weapon(&item.weapon)?;

        if let Some((owner, existing)) = self.find_conflicting(&item).await? {
            if owner != family {
                warn!(
                    skin_id = %existing.id,
                    shard = %owner,
                    requested_shard = %family,
                    weapon = %item.weapon,
                    "Skin exists on another shard, keeping its owner"
                );
            }
            debug!(skin_id = %existing.id, shard = %owner, "Skin already exists, updating instead");
            return q::update_skin(self.router.shard(owner), existing.id, &item).await;
        }

        match q::insert_skin(shard, &item).await {
            Ok(created) => {
                info!(
                    skin_id = %created.id,
                    shard = %family,
                    market_hash_name = %created.market_hash_name,
                    "Created skin"
                );
                Ok(created)
            }
            Err(PipelineError::Database(e)) if q::is_unique_violation(&e) => {
                // Lost a race with a concurrent insert of the same skin
                let (owner, existing) = self.find_conflicting(&item).await?.ok_or_else(|| {
                    PipelineError::Conflict(format!(
                        "unique violation for {} but no conflicting row found",
                        item.market_hash_name
                    ))
                })?;
                debug!(skin_id = %existing.id, shard = %owner, "Skin already exists, updating instead");
                q::update_skin(self.router.shard(owner), existing.id, &item).await
            }
            Err(e) => Err(e),
        }
    }

    async fn update_item(&self, id: Uuid, item: NewSkin) -> Result<skins::Model> {
        let family = self.router.locate(id).await?;
        q::update_skin(self.router.shard(family), id, &item).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<skins::Model> {
        self.router
            .find_first(&format!("skin {}", id), |db| async move { q::find_by_id(&db, id).await })
            .await
            .map(|(_, skin)| skin)
    }

    async fn get_by_hash_name(&self, market_hash_name: &str) -> Result<skins::Model> {
        let name = market_hash_name.to_string();
        self.router
            .find_first(&format!("skin {}", market_hash_name), |db| {
                let name = name.clone();
                async move { q::find_by_hash_name(&db, &name).await }
            })
            .await
            .map(|(_, skin)| skin)
    }

    async fn get_by_slug(&self, slug: &str) -> Result<skins::Model> {
        let slug_owned = slug.to_string();
        self.router
            .find_first(&format!("skin slug {}", slug), |db| {
                let slug = slug_owned.clone();
                async move { q::find_by_slug(&db, &slug).await }
            })
            .await
            .map(|(_, skin)| skin)
    }

    async fn list_all(&self) -> Result<Vec<skins::Model>> {
        let mut rows = self
            .router
            .scatter_select("list_all", |db| async move { q::list_all(&db).await })
            .await;
        rows.sort_by(|a, b| a.market_hash_name.cmp(&b.market_hash_name));
        Ok(rows)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self
            .router
            .count("count", |db| async move { q::count(&db).await })
            .await)
    }

    async fn search(&self, query: &str, limit: u64) -> Result<Vec<skins::Model>> {
        let query = query.to_string();
        let rows = self
            .router
            .scatter_select("search", |db| {
                let query = query.clone();
                async move { q::search(&db, &query, limit).await }
            })
            .await;
        Ok(Ranking::MostPopular.merge(rows, limit))
    }

    async fn update_item_price(
        &self,
        id: Uuid,
        price: Decimal,
        volume: i64,
        source: &str,
    ) -> Result<PriceChange> {
        let source = source.to_string();
        self.router
            .txn_by_id(id, move |txn| {
                Box::pin(async move { q::apply_price_update(txn, id, price, volume, &source).await })
            })
            .await
    }

    async fn append_price_sample(&self, sample: NewPriceSample) -> Result<price_history::Model> {
        let family = self.router.locate(sample.skin_id).await?;
        q::insert_price_sample(self.router.shard(family), &sample).await
    }

    async fn price_history(&self, skin_id: Uuid, limit: u64) -> Result<Vec<price_history::Model>> {
        let family = self.router.locate(skin_id).await?;
        q::price_history(self.router.shard(family), skin_id, limit).await
    }

    async fn get_active_watches_by_item(&self, skin_id: Uuid) -> Result<Vec<watchlist::Model>> {
        let family = self.router.locate(skin_id).await?;
        q::active_watches(self.router.shard(family), skin_id).await
    }

    async fn upsert_watch(&self, watch: NewWatch) -> Result<watchlist::Model> {
        self.router
            .txn_by_id(watch.skin_id, move |txn| {
                Box::pin(async move { q::upsert_watch(txn, &watch).await })
            })
            .await
    }

    async fn deactivate_watch(&self, user_id: Uuid, skin_id: Uuid) -> Result<bool> {
        let family = self.router.locate(skin_id).await?;
        q::deactivate_watch(self.router.shard(family), user_id, skin_id).await
    }

    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<notification_preferences::Model>> {
        q::get_preferences(&self.primary, user_id).await
    }

    async fn upsert_preferences(
        &self,
        user_id: Uuid,
        preferences: Preferences,
    ) -> Result<notification_preferences::Model> {
        q::upsert_preferences(&self.primary, user_id, preferences).await
    }

    async fn create_notification(&self, notification: NewNotification) -> Result<notifications::Model> {
        q::insert_notification(&self.primary, &notification).await
    }

    async fn list_notifications(&self, user_id: Uuid, limit: u64) -> Result<Vec<notifications::Model>> {
        q::list_notifications(&self.primary, user_id, limit).await
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<notifications::Model> {
        q::mark_notification_read(&self.primary, id).await
    }

    async fn ranked(&self, ranking: Ranking, limit: u64) -> Result<Vec<skins::Model>> {
        let rows = self
            .router
            .scatter_select("ranked", |db| async move { q::ranked(&db, ranking, limit).await })
            .await;
        Ok(ranking.merge(rows, limit))
    }

    async fn purge_price_history(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let purged = self
            .router
            .scatter("purge_price_history", |db| async move {
                q::purge_price_history(&db, older_than).await
            })
            .await;
        if purged.len() < SHARD_COUNT {
            warn!(reachable = purged.len(), "Price history purge skipped unreachable shards");
        }
        Ok(purged.into_iter().map(|(_, n)| n).sum())
    }

    async fn health(&self) -> Vec<StoreHealth> {
        let mut report = Vec::new();
        for (family, db) in self.router.shards() {
            report.push(StoreHealth {
                name: format!("shard:{}", family),
                healthy: q::ping(db).await.is_ok(),
            });
        }
        report.push(StoreHealth {
            name: "primary".to_string(),
            healthy: q::ping(&self.primary).await.is_ok(),
        });
        report
    }
}
