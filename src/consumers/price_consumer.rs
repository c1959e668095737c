//! Price Consumer
//!
//! Consumes price-update events: appends the price sample, refreshes the
//! hot-item and trending projections, and fans alerts out to every active
//! watch whose conditions the new price meets.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::consumers::MessageHandler;
use crate::error::{PipelineError, Result};
use crate::models::events::{PriceAlertEvent, PriceUpdateEvent};
use crate::models::watch::alert_type;
use crate::services::analytics::CachedPrice;
use crate::services::cache::{self, Cache, CacheCommand, keys, ttl};
use crate::services::event_bus::{BusMessage, TopicProducer};
use crate::services::item_store::{ItemRepository, NewPriceSample};

/// Moves at or above this many percent invalidate the market overview
pub const OVERVIEW_INVALIDATION_THRESHOLD: f64 = 5.0;

pub struct PriceConsumer {
    store: Arc<dyn ItemRepository>,
    cache: Arc<dyn Cache>,
    alerts: TopicProducer,
}

fn to_decimal(value: f64, field: &str) -> Result<Decimal> {
    Decimal::from_f64(value)
        .filter(|d| *d >= Decimal::ZERO)
        .ok_or_else(|| PipelineError::Decode(format!("{} is not a valid price: {}", field, value)))
}

impl PriceConsumer {
    pub fn new(store: Arc<dyn ItemRepository>, cache: Arc<dyn Cache>, alerts: TopicProducer) -> Self {
        Self { store, cache, alerts }
    }

    async fn refresh_projections(&self, event: &PriceUpdateEvent) {
        let cached = CachedPrice {
            price: event.new_price,
            currency: event.currency.clone(),
            updated_at: event.timestamp,
            source: event.source.clone(),
            volume: event.volume_24h,
        };
        if let Err(e) = cache::set_json(
            self.cache.as_ref(),
            &keys::skin_price(event.skin_id),
            &cached,
            Some(ttl::SKIN_PRICE),
        )
        .await
        {
            warn!(skin_id = %event.skin_id, error = %e, "Failed to update hot-item cache");
        }

        let member = event.skin_id.to_string();
        let mut commands = Vec::with_capacity(4);
        for key in [keys::TRENDING_24H, keys::TRENDING_7D] {
            commands.push(CacheCommand::ZAdd {
                key: key.to_string(),
                member: member.clone(),
                score: event.price_change,
            });
            commands.push(CacheCommand::Expire {
                key: key.to_string(),
                ttl: ttl::TRENDING,
            });
        }
        if let Err(e) = self.cache.pipeline(commands).await {
            warn!(skin_id = %event.skin_id, error = %e, "Failed to update trending index");
        }

        if event.price_change.abs() >= OVERVIEW_INVALIDATION_THRESHOLD {
            if let Err(e) = self.cache.delete(keys::MARKET_OVERVIEW).await {
                warn!(error = %e, "Failed to invalidate market overview");
            }
        }
    }

    async fn fan_out(&self, event: &PriceUpdateEvent, old_price: Decimal, new_price: Decimal) -> Result<usize> {
        let watches = self.store.get_active_watches_by_item(event.skin_id).await?;
        if watches.is_empty() {
            return Ok(0);
        }

        let mut image_url: Option<String> = None;
        let mut published = 0;

        for watch in watches {
            let Some(notification_type) = alert_type(&watch, old_price, new_price) else {
                continue;
            };

            // Alert already delivered for this pair within the dedup window
            match self.cache.exists(&keys::alert_sent(watch.user_id, event.skin_id)).await {
                Ok(true) => {
                    debug!(user_id = %watch.user_id, skin_id = %event.skin_id, "Alert recently sent, skipping");
                    continue;
                }
                Ok(false) => {}
                Err(e) => warn!(user_id = %watch.user_id, error = %e, "Dedup lookup failed, publishing anyway"),
            }

            if image_url.is_none() {
                image_url = Some(match self.store.get_by_id(event.skin_id).await {
                    Ok(skin) => skin.image_url.unwrap_or_default(),
                    Err(e) => {
                        warn!(skin_id = %event.skin_id, error = %e, "Could not load skin image");
                        String::new()
                    }
                });
            }

            let alert = PriceAlertEvent {
                user_id: watch.user_id,
                skin_id: event.skin_id,
                market_hash_name: event.market_hash_name.clone(),
                notification_type,
                target_price: watch.target_price.and_then(|t| t.to_f64()),
                old_price: event.old_price,
                current_price: event.new_price,
                price_change: event.price_change,
                skin_image_url: image_url.clone().unwrap_or_default(),
                timestamp: Utc::now(),
            };

            match self.alerts.publish_json(&alert.key(), &alert).await {
                Ok(_) => published += 1,
                Err(e) => warn!(
                    user_id = %watch.user_id,
                    skin_id = %event.skin_id,
                    error = %e,
                    "Failed to publish price alert"
                ),
            }
        }

        Ok(published)
    }
}

#[async_trait]
impl MessageHandler for PriceConsumer {
    fn name(&self) -> &'static str {
        "price-consumer"
    }

    async fn handle(&self, message: &BusMessage) -> Result<()> {
        let event: PriceUpdateEvent = message.decode()?;
        let old_price = to_decimal(event.old_price, "old_price")?;
        let new_price = to_decimal(event.new_price, "new_price")?;

        self.store
            .append_price_sample(NewPriceSample {
                skin_id: event.skin_id,
                price: new_price,
                volume: event.volume_24h,
                source: event.source.clone(),
            })
            .await?;

        self.refresh_projections(&event).await;

        let published = self.fan_out(&event, old_price, new_price).await?;
        debug!(
            skin_id = %event.skin_id,
            price_change = event.price_change,
            alerts = published,
            "Processed price update"
        );
        Ok(())
    }
}
