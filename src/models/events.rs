//! Wire formats published on the event bus (JSON, UTF-8)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::skins;
use crate::models::notification::AlertCategory;

/// Alert kind carried in `notification_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PriceDrop,
    PriceIncrease,
    TargetReached,
    SkinDiscovered,
    SystemAlert,
    WatchlistUpdate,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::PriceDrop => "price_drop",
            NotificationType::PriceIncrease => "price_increase",
            NotificationType::TargetReached => "target_reached",
            NotificationType::SkinDiscovered => "skin_discovered",
            NotificationType::SystemAlert => "system_alert",
            NotificationType::WatchlistUpdate => "watchlist_update",
        }
    }

    /// Preference category used for filtering
    pub fn category(&self) -> AlertCategory {
        match self {
            NotificationType::PriceDrop => AlertCategory::PriceDrop,
            NotificationType::PriceIncrease => AlertCategory::PriceIncrease,
            NotificationType::TargetReached => AlertCategory::TargetReached,
            NotificationType::SkinDiscovered => AlertCategory::Discovered,
            NotificationType::SystemAlert | NotificationType::WatchlistUpdate => {
                AlertCategory::System
            }
        }
    }
}

/// Published on `skin.price.updated`, keyed by skin id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdateEvent {
    pub skin_id: Uuid,
    pub slug: String,
    pub market_hash_name: String,
    pub source: String,
    pub old_price: f64,
    pub new_price: f64,
    pub currency: String,
    pub volume_24h: i64,
    /// Signed percent change
    pub price_change: f64,
    pub timestamp: DateTime<Utc>,
}

impl PriceUpdateEvent {
    pub fn new(
        skin: &skins::Model,
        source: &str,
        old_price: Decimal,
        new_price: Decimal,
        price_change: Decimal,
        volume_24h: i64,
    ) -> Self {
        Self {
            skin_id: skin.id,
            slug: skin.slug.clone(),
            market_hash_name: skin.market_hash_name.clone(),
            source: source.to_string(),
            old_price: old_price.to_f64().unwrap_or(0.0),
            new_price: new_price.to_f64().unwrap_or(0.0),
            currency: skin.currency.clone(),
            volume_24h,
            price_change: price_change.to_f64().unwrap_or(0.0),
            timestamp: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        self.skin_id.to_string()
    }
}

/// Published on `notification.price_alert`, keyed by user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAlertEvent {
    pub user_id: Uuid,
    pub skin_id: Uuid,
    pub market_hash_name: String,
    pub notification_type: NotificationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_price: Option<f64>,
    pub old_price: f64,
    pub current_price: f64,
    pub price_change: f64,
    #[serde(default)]
    pub skin_image_url: String,
    pub timestamp: DateTime<Utc>,
}

impl PriceAlertEvent {
    pub fn key(&self) -> String {
        self.user_id.to_string()
    }
}

/// Published on `skin.discovered`, keyed by market hash name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkinDiscoveredEvent {
    pub market_hash_name: String,
    pub name: String,
    pub weapon: String,
    pub quality: String,
    pub rarity: String,
    pub initial_price: f64,
    pub currency: String,
    pub source: String,
    #[serde(default)]
    pub image_url: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type_wire_names() {
        let json = serde_json::to_string(&NotificationType::TargetReached).unwrap();
        assert_eq!(json, "\"target_reached\"");

        let parsed: NotificationType = serde_json::from_str("\"skin_discovered\"").unwrap();
        assert_eq!(parsed, NotificationType::SkinDiscovered);
        assert_eq!(parsed.as_str(), "skin_discovered");
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            NotificationType::SkinDiscovered.category(),
            AlertCategory::Discovered
        );
        assert_eq!(
            NotificationType::WatchlistUpdate.category(),
            AlertCategory::System
        );
        assert_eq!(
            NotificationType::PriceDrop.category(),
            AlertCategory::PriceDrop
        );
    }

    #[test]
    fn test_alert_event_omits_missing_target() {
        let event = PriceAlertEvent {
            user_id: Uuid::new_v4(),
            skin_id: Uuid::new_v4(),
            market_hash_name: "AWP | Asiimov (Field-Tested)".to_string(),
            notification_type: NotificationType::PriceDrop,
            target_price: None,
            old_price: 100.0,
            current_price: 90.0,
            price_change: -10.0,
            skin_image_url: String::new(),
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("target_price").is_none());
        assert_eq!(value["notification_type"], "price_drop");
        assert_eq!(value["current_price"], 90.0);
    }

    #[test]
    fn test_price_update_event_field_names() {
        let raw = r#"{
            "skin_id": "6f1c1c3e-8d0a-4f55-9a43-0a9b8d1f2c11",
            "slug": "ak-47-redline-field-tested",
            "market_hash_name": "AK-47 | Redline (Field-Tested)",
            "source": "steam",
            "old_price": 0.5,
            "new_price": 0.58,
            "currency": "USD",
            "volume_24h": 1397,
            "price_change": 16.0,
            "timestamp": "2026-10-18T03:00:00Z"
        }"#;

        let event: PriceUpdateEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.volume_24h, 1397);
        assert_eq!(event.price_change, 16.0);
        assert_eq!(event.key(), "6f1c1c3e-8d0a-4f55-9a43-0a9b8d1f2c11");
    }
}
