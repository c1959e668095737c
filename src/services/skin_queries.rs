//! Shard-local queries
//!
//! Written once against `ConnectionTrait` and shared by the single-pool and
//! sharded stores. Nothing here knows about routing.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, Func, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, Statement,
};
use uuid::Uuid;

use crate::entities::prelude::*;
use crate::entities::{notification_preferences, notifications, price_history, skins, watchlist};
use crate::error::{PipelineError, Result};
use crate::models::notification::{NewNotification, Preferences};
use crate::models::skin::NewSkin;
use crate::models::watch::NewWatch;
use crate::services::item_store::{NewPriceSample, PriceChange, Ranking, TrendPeriod};

pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// `100 * (new - old) / old`, 0 when there is no usable base
pub fn percent_change(old: Decimal, new: Decimal) -> Decimal {
    if old > Decimal::ZERO {
        (Decimal::ONE_HUNDRED * (new - old) / old).round_dp(8)
    } else {
        Decimal::ZERO
    }
}

/// Lowest observed price; 0 means nothing recorded yet
fn running_low(lowest: Decimal, old: Decimal, new: Decimal) -> Decimal {
    [lowest, old, new]
        .into_iter()
        .filter(|p| *p > Decimal::ZERO)
        .min()
        .unwrap_or(Decimal::ZERO)
}

fn running_high(highest: Decimal, old: Decimal, new: Decimal) -> Decimal {
    highest.max(old).max(new)
}

pub async fn insert_skin<C: ConnectionTrait>(db: &C, item: &NewSkin) -> Result<skins::Model> {
    let now = Utc::now().fixed_offset();
    let price = item.initial_price.unwrap_or(Decimal::ZERO).max(Decimal::ZERO);

    let model = skins::ActiveModel {
        id: Set(Uuid::new_v4()),
        market_hash_name: Set(item.market_hash_name.clone()),
        slug: Set(item.slug()),
        name: Set(item.name.clone()),
        weapon: Set(item.weapon.clone()),
        quality: Set(item.quality.clone()),
        rarity: Set(item.rarity.clone()),
        image_url: Set(item.image_url.clone()),
        current_price: Set(price),
        currency: Set(item.currency.clone()),
        volume_24h: Set(0),
        price_change_24h: Set(Decimal::ZERO),
        price_change_7d: Set(Decimal::ZERO),
        lowest_price: Set(price),
        highest_price: Set(price),
        last_updated: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    Ok(model.insert(db).await?)
}

/// Updates descriptive columns. Weapon is left alone so the row never
/// changes owner shard.
pub async fn update_skin<C: ConnectionTrait>(db: &C, id: Uuid, item: &NewSkin) -> Result<skins::Model> {
    let existing = find_by_id(db, id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("skin {}", id)))?;

    let mut model: skins::ActiveModel = existing.into();
    model.name = Set(item.name.clone());
    model.quality = Set(item.quality.clone());
    model.rarity = Set(item.rarity.clone());
    if item.image_url.is_some() {
        model.image_url = Set(item.image_url.clone());
    }
    model.updated_at = Set(Utc::now().fixed_offset());

    Ok(model.update(db).await?)
}

pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<skins::Model>> {
    Ok(Skins::find_by_id(id).one(db).await?)
}

pub async fn find_by_hash_name<C: ConnectionTrait>(db: &C, name: &str) -> Result<Option<skins::Model>> {
    Ok(Skins::find()
        .filter(skins::Column::MarketHashName.eq(name))
        .one(db)
        .await?)
}

pub async fn find_by_slug<C: ConnectionTrait>(db: &C, slug: &str) -> Result<Option<skins::Model>> {
    Ok(Skins::find()
        .filter(skins::Column::Slug.eq(slug))
        .one(db)
        .await?)
}

/// Row that blocks an insert of `item`, matched on hash name then slug
pub async fn find_conflicting<C: ConnectionTrait>(db: &C, item: &NewSkin) -> Result<Option<skins::Model>> {
    if let Some(existing) = find_by_hash_name(db, &item.market_hash_name).await? {
        return Ok(Some(existing));
    }
    find_by_slug(db, &item.slug()).await
}

pub async fn list_all<C: ConnectionTrait>(db: &C) -> Result<Vec<skins::Model>> {
    Ok(Skins::find()
        .order_by_asc(skins::Column::MarketHashName)
        .all(db)
        .await?)
}

pub async fn count<C: ConnectionTrait>(db: &C) -> Result<u64> {
    Ok(Skins::find().count(db).await?)
}

pub async fn search<C: ConnectionTrait>(db: &C, query: &str, limit: u64) -> Result<Vec<skins::Model>> {
    Ok(Skins::find()
        .filter(skins::Column::MarketHashName.contains(query.trim()))
        .order_by_desc(skins::Column::Volume24h)
        .limit(limit)
        .all(db)
        .await?)
}

fn change_column(period: TrendPeriod) -> skins::Column {
    match period {
        TrendPeriod::Day => skins::Column::PriceChange24h,
        TrendPeriod::Week => skins::Column::PriceChange7d,
    }
}

/// Shard-local analytics read; callers merging shards re-sort with
/// [`Ranking::merge`].
pub async fn ranked<C: ConnectionTrait>(db: &C, ranking: Ranking, limit: u64) -> Result<Vec<skins::Model>> {
    let select = Skins::find();
    let select = match ranking {
        Ranking::Trending(period) => select.order_by_desc(SimpleExpr::from(Func::abs(Expr::col(
            change_column(period),
        )))),
        Ranking::TopGainers => select
            .filter(skins::Column::PriceChange24h.gt(Decimal::ZERO))
            .order_by_desc(skins::Column::PriceChange24h),
        Ranking::TopLosers => select
            .filter(skins::Column::PriceChange24h.lt(Decimal::ZERO))
            .order_by_asc(skins::Column::PriceChange24h),
        Ranking::MostPopular => select.order_by_desc(skins::Column::Volume24h),
        Ranking::RecentlyUpdated => select
            .filter(skins::Column::LastUpdated.is_not_null())
            .order_by_desc(skins::Column::LastUpdated),
    };

    Ok(select.limit(limit).all(db).await?)
}

/// Body of UpdateItemPrice; must run inside a transaction on the owning shard.
pub async fn apply_price_update<C: ConnectionTrait>(
    txn: &C,
    id: Uuid,
    price: Decimal,
    volume: i64,
    source: &str,
) -> Result<PriceChange> {
    let mut select = Skins::find_by_id(id);
    if txn.get_database_backend() == DatabaseBackend::Postgres {
        select = select.lock_exclusive();
    }
    let skin = select
        .one(txn)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("skin {}", id)))?;

    let now = Utc::now();
    let old_price = skin.current_price;
    let change = percent_change(old_price, price);

    let baseline = PriceHistory::find()
        .filter(price_history::Column::SkinId.eq(id))
        .filter(price_history::Column::RecordedAt.gte((now - Duration::days(7)).fixed_offset()))
        .order_by_asc(price_history::Column::RecordedAt)
        .one(txn)
        .await?;
    let change_7d = baseline
        .map(|sample| percent_change(sample.price, price))
        .unwrap_or(Decimal::ZERO);

    let lowest = running_low(skin.lowest_price, old_price, price);
    let highest = running_high(skin.highest_price, old_price, price);

    let mut model: skins::ActiveModel = skin.into();
    model.current_price = Set(price);
    model.volume_24h = Set(volume.max(0));
    model.price_change_24h = Set(change);
    model.price_change_7d = Set(change_7d);
    model.lowest_price = Set(lowest);
    model.highest_price = Set(highest);
    model.last_updated = Set(Some(now.fixed_offset()));
    model.updated_at = Set(now.fixed_offset());
    let updated = model.update(txn).await?;

    insert_price_sample(
        txn,
        &NewPriceSample {
            skin_id: id,
            price,
            volume,
            source: source.to_string(),
        },
    )
    .await?;

    Ok(PriceChange {
        skin: updated,
        old_price,
        new_price: price,
        change,
    })
}

pub async fn insert_price_sample<C: ConnectionTrait>(
    db: &C,
    sample: &NewPriceSample,
) -> Result<price_history::Model> {
    let model = price_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        skin_id: Set(sample.skin_id),
        price: Set(sample.price),
        volume: Set(sample.volume.max(0)),
        source: Set(sample.source.clone()),
        recorded_at: Set(Utc::now().fixed_offset()),
    };
    Ok(model.insert(db).await?)
}

pub async fn price_history<C: ConnectionTrait>(
    db: &C,
    skin_id: Uuid,
    limit: u64,
) -> Result<Vec<price_history::Model>> {
    Ok(PriceHistory::find()
        .filter(price_history::Column::SkinId.eq(skin_id))
        .order_by_desc(price_history::Column::RecordedAt)
        .limit(limit)
        .all(db)
        .await?)
}

pub async fn purge_price_history<C: ConnectionTrait>(
    db: &C,
    older_than: chrono::DateTime<Utc>,
) -> Result<u64> {
    let result = PriceHistory::delete_many()
        .filter(price_history::Column::RecordedAt.lt(older_than.fixed_offset()))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

pub async fn active_watches<C: ConnectionTrait>(db: &C, skin_id: Uuid) -> Result<Vec<watchlist::Model>> {
    Ok(Watchlist::find()
        .filter(watchlist::Column::SkinId.eq(skin_id))
        .filter(watchlist::Column::IsActive.eq(true))
        .all(db)
        .await?)
}

/// At most one active watch per (user, item): update it if present,
/// insert otherwise. Run inside a transaction.
pub async fn upsert_watch<C: ConnectionTrait>(txn: &C, watch: &NewWatch) -> Result<watchlist::Model> {
    if let Some(target) = watch.target_price {
        if target <= Decimal::ZERO {
            return Err(PipelineError::BadConfig(format!(
                "target price must be positive, got {}",
                target
            )));
        }
    }

    let now = Utc::now().fixed_offset();
    let existing = Watchlist::find()
        .filter(watchlist::Column::UserId.eq(watch.user_id))
        .filter(watchlist::Column::SkinId.eq(watch.skin_id))
        .filter(watchlist::Column::IsActive.eq(true))
        .one(txn)
        .await?;

    match existing {
        Some(current) => {
            let mut model: watchlist::ActiveModel = current.into();
            model.target_price = Set(watch.target_price);
            model.notify_on_drop = Set(watch.notify_on_drop);
            model.notify_on_target = Set(watch.notify_on_target);
            model.updated_at = Set(now);
            Ok(model.update(txn).await?)
        }
        None => {
            let model = watchlist::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(watch.user_id),
                skin_id: Set(watch.skin_id),
                target_price: Set(watch.target_price),
                notify_on_drop: Set(watch.notify_on_drop),
                notify_on_target: Set(watch.notify_on_target),
                is_active: Set(true),
                created_at: Set(now),
                updated_at: Set(now),
            };
            Ok(model.insert(txn).await?)
        }
    }
}

pub async fn deactivate_watch<C: ConnectionTrait>(db: &C, user_id: Uuid, skin_id: Uuid) -> Result<bool> {
    let result = Watchlist::update_many()
        .col_expr(watchlist::Column::IsActive, Expr::value(false))
        .col_expr(watchlist::Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(watchlist::Column::UserId.eq(user_id))
        .filter(watchlist::Column::SkinId.eq(skin_id))
        .filter(watchlist::Column::IsActive.eq(true))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

pub async fn get_preferences<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
) -> Result<Option<notification_preferences::Model>> {
    Ok(NotificationPreferences::find_by_id(user_id).one(db).await?)
}

pub async fn upsert_preferences<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    preferences: Preferences,
) -> Result<notification_preferences::Model> {
    let exists = get_preferences(db, user_id).await?.is_some();
    let model = preferences.into_active_model(user_id);
    if exists {
        Ok(model.update(db).await?)
    } else {
        Ok(model.insert(db).await?)
    }
}

pub async fn insert_notification<C: ConnectionTrait>(
    db: &C,
    notification: &NewNotification,
) -> Result<notifications::Model> {
    let model = notifications::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(notification.user_id),
        notification_type: Set(notification.notification_type.as_str().to_string()),
        title: Set(notification.title.clone()),
        message: Set(notification.message.clone()),
        data: Set(notification.data.clone()),
        priority: Set(notification.priority.as_str().to_string()),
        is_read: Set(false),
        created_at: Set(Utc::now().fixed_offset()),
        read_at: Set(None),
    };
    Ok(model.insert(db).await?)
}

pub async fn list_notifications<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    limit: u64,
) -> Result<Vec<notifications::Model>> {
    Ok(Notifications::find()
        .filter(notifications::Column::UserId.eq(user_id))
        .order_by_desc(notifications::Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await?)
}

pub async fn mark_notification_read<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<notifications::Model> {
    let notification = Notifications::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("notification {}", id)))?;

    if notification.is_read {
        return Ok(notification);
    }

    let mut model: notifications::ActiveModel = notification.into();
    model.is_read = Set(true);
    model.read_at = Set(Some(Utc::now().fixed_offset()));
    Ok(model.update(db).await?)
}

/// Cheap round trip used by health checks
pub async fn ping<C: ConnectionTrait>(db: &C) -> Result<()> {
    let backend = db.get_database_backend();
    db.execute(Statement::from_string(backend, "SELECT 1".to_string()))
        .await?;
    Ok(())
}
