//! Item Store over a single pool

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::{notification_preferences, notifications, price_history, skins, watchlist};
use crate::error::{PipelineError, Result};
use crate::models::notification::{NewNotification, Preferences};
use crate::models::skin::NewSkin;
use crate::models::watch::NewWatch;
use crate::services::item_store::{
    ItemRepository, NewPriceSample, PriceChange, Ranking, StoreHealth,
};
use crate::services::shard_router::run_in_txn;
use crate::services::skin_queries as q;

#[derive(Clone)]
pub struct DbItemStore {
    db: DatabaseConnection,
}

impl DbItemStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl ItemRepository for DbItemStore {
    async fn create_item(&self, item: NewSkin) -> Result<skins::Model> {
        match q::insert_skin(&self.db, &item).await {
            Ok(created) => {
                info!(skin_id = %created.id, market_hash_name = %created.market_hash_name, "Created skin");
                Ok(created)
            }
            Err(PipelineError::Database(e)) if q::is_unique_violation(&e) => {
                let existing = q::find_conflicting(&self.db, &item).await?.ok_or_else(|| {
                    PipelineError::Conflict(format!(
                        "unique violation for {} but no conflicting row found",
                        item.market_hash_name
                    ))
                })?;
                debug!(skin_id = %existing.id, "Skin already exists, updating instead");
                q::update_skin(&self.db, existing.id, &item).await
            }
            Err(e) => Err(e),
        }
    }

    async fn update_item(&self, id: Uuid, item: NewSkin) -> Result<skins::Model> {
        q::update_skin(&self.db, id, &item).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<skins::Model> {
        q::find_by_id(&self.db, id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("skin {}", id)))
    }

    async fn get_by_hash_name(&self, market_hash_name: &str) -> Result<skins::Model> {
        q::find_by_hash_name(&self.db, market_hash_name)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("skin {}", market_hash_name)))
    }

    async fn get_by_slug(&self, slug: &str) -> Result<skins::Model> {
        q::find_by_slug(&self.db, slug)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("skin slug {}", slug)))
    }

    async fn list_all(&self) -> Result<Vec<skins::Model>> {
        q::list_all(&self.db).await
    }

    async fn count(&self) -> Result<u64> {
        q::count(&self.db).await
    }

    async fn search(&self, query: &str, limit: u64) -> Result<Vec<skins::Model>> {
        q::search(&self.db, query, limit).await
    }

    async fn update_item_price(
        &self,
        id: Uuid,
        price: Decimal,
        volume: i64,
        source: &str,
    ) -> Result<PriceChange> {
        let source = source.to_string();
        run_in_txn(&self.db, move |txn| {
            Box::pin(async move { q::apply_price_update(txn, id, price, volume, &source).await })
        })
        .await
    }

    async fn append_price_sample(&self, sample: NewPriceSample) -> Result<price_history::Model> {
        if q::find_by_id(&self.db, sample.skin_id).await?.is_none() {
            return Err(PipelineError::NotFound(format!("skin {}", sample.skin_id)));
        }
        q::insert_price_sample(&self.db, &sample).await
    }

    async fn price_history(&self, skin_id: Uuid, limit: u64) -> Result<Vec<price_history::Model>> {
        q::price_history(&self.db, skin_id, limit).await
    }

    async fn get_active_watches_by_item(&self, skin_id: Uuid) -> Result<Vec<watchlist::Model>> {
        q::active_watches(&self.db, skin_id).await
    }

    async fn upsert_watch(&self, watch: NewWatch) -> Result<watchlist::Model> {
        self.get_by_id(watch.skin_id).await?;
        run_in_txn(&self.db, move |txn| {
            Box::pin(async move { q::upsert_watch(txn, &watch).await })
        })
        .await
    }

    async fn deactivate_watch(&self, user_id: Uuid, skin_id: Uuid) -> Result<bool> {
        q::deactivate_watch(&self.db, user_id, skin_id).await
    }

    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<notification_preferences::Model>> {
        q::get_preferences(&self.db, user_id).await
    }

    async fn upsert_preferences(
        &self,
        user_id: Uuid,
        preferences: Preferences,
    ) -> Result<notification_preferences::Model> {
        q::upsert_preferences(&self.db, user_id, preferences).await
    }

    async fn create_notification(&self, notification: NewNotification) -> Result<notifications::Model> {
        q::insert_notification(&self.db, &notification).await
    }

    async fn list_notifications(&self, user_id: Uuid, limit: u64) -> Result<Vec<notifications::Model>> {
        q::list_notifications(&self.db, user_id, limit).await
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<notifications::Model> {
        q::mark_notification_read(&self.db, id).await
    }

    async fn ranked(&self, ranking: Ranking, limit: u64) -> Result<Vec<skins::Model>> {
        q::ranked(&self.db, ranking, limit).await
    }

    async fn purge_price_history(&self, older_than: DateTime<Utc>) -> Result<u64> {
        q::purge_price_history(&self.db, older_than).await
    }

    async fn health(&self) -> Vec<StoreHealth> {
        vec![StoreHealth {
            name: "primary".to_string(),
            healthy: q::ping(&self.db).await.is_ok(),
        }]
    }
}
