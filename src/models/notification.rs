//! Notification rules: categories, priority, quiet hours and templates

use chrono::{NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::entities::notification_preferences;
use crate::models::events::{NotificationType, PriceAlertEvent};

/// Category a user can enable or disable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    PriceDrop,
    PriceIncrease,
    TargetReached,
    Discovered,
    System,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::PriceDrop => "price_drop",
            AlertCategory::PriceIncrease => "price_increase",
            AlertCategory::TargetReached => "target_reached",
            AlertCategory::Discovered => "discovered",
            AlertCategory::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "price_drop" => Some(AlertCategory::PriceDrop),
            "price_increase" => Some(AlertCategory::PriceIncrease),
            "target_reached" => Some(AlertCategory::TargetReached),
            "discovered" => Some(AlertCategory::Discovered),
            "system" => Some(AlertCategory::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// <5 low, <10 normal, <20 high, otherwise urgent
    pub fn from_change(price_change: f64) -> Self {
        let abs = price_change.abs();
        if abs < 5.0 {
            Priority::Low
        } else if abs < 10.0 {
            Priority::Normal
        } else if abs < 20.0 {
            Priority::High
        } else {
            Priority::Urgent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

/// Daily quiet window; `start > end` means the window crosses midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
        Some(Self { start, end })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start < self.end {
            self.start <= t && t < self.end
        } else if self.start > self.end {
            t >= self.start || t < self.end
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFlags {
    pub email: bool,
    pub push: bool,
    pub in_app: bool,
    pub webhook: bool,
}

/// Effective per-user preferences
#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    pub enabled: BTreeSet<AlertCategory>,
    /// Minimum absolute percent change to forward
    pub min_price_change: f64,
    pub quiet_hours: Option<QuietHours>,
    pub channels: ChannelFlags,
    pub webhook_url: Option<String>,
}

pub const DEFAULT_MIN_PRICE_CHANGE: f64 = 5.0;

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enabled: [AlertCategory::PriceDrop, AlertCategory::TargetReached]
                .into_iter()
                .collect(),
            min_price_change: DEFAULT_MIN_PRICE_CHANGE,
            quiet_hours: None,
            channels: ChannelFlags {
                email: true,
                push: false,
                in_app: true,
                webhook: false,
            },
            webhook_url: None,
        }
    }
}

impl Preferences {
    pub fn from_model(model: &notification_preferences::Model) -> Self {
        let enabled = model
            .enabled_types
            .as_array()
            .map(|types| {
                types
                    .iter()
                    .filter_map(|t| t.as_str())
                    .filter_map(AlertCategory::from_str)
                    .collect()
            })
            .unwrap_or_default();

        let quiet_hours = if model.quiet_hours_enabled {
            match (&model.quiet_hours_start, &model.quiet_hours_end) {
                (Some(start), Some(end)) => QuietHours::parse(start, end),
                _ => None,
            }
        } else {
            None
        };

        Self {
            enabled,
            min_price_change: model
                .min_price_change
                .to_f64()
                .unwrap_or(DEFAULT_MIN_PRICE_CHANGE),
            quiet_hours,
            channels: ChannelFlags {
                email: model.email_enabled,
                push: model.push_enabled,
                in_app: model.in_app_enabled,
                webhook: model.webhook_enabled,
            },
            webhook_url: model.webhook_url.clone(),
        }
    }

    pub fn into_active_model(self, user_id: Uuid) -> notification_preferences::ActiveModel {
        let enabled: Vec<&str> = self.enabled.iter().map(|c| c.as_str()).collect();
        notification_preferences::ActiveModel {
            user_id: Set(user_id),
            enabled_types: Set(json!(enabled)),
            min_price_change: Set(Decimal::from_f64(self.min_price_change)
                .unwrap_or(Decimal::from(5))),
            quiet_hours_enabled: Set(self.quiet_hours.is_some()),
            quiet_hours_start: Set(self
                .quiet_hours
                .map(|q| q.start.format("%H:%M").to_string())),
            quiet_hours_end: Set(self.quiet_hours.map(|q| q.end.format("%H:%M").to_string())),
            email_enabled: Set(self.channels.email),
            push_enabled: Set(self.channels.push),
            in_app_enabled: Set(self.channels.in_app),
            webhook_enabled: Set(self.channels.webhook),
            webhook_url: Set(self.webhook_url),
            updated_at: Set(Utc::now().fixed_offset()),
        }
    }

    pub fn in_quiet_hours(&self, now: NaiveTime) -> bool {
        self.quiet_hours.map(|q| q.contains(now)).unwrap_or(false)
    }

    /// Not in quiet hours, category enabled and change large enough
    pub fn should_send(&self, category: AlertCategory, price_change: f64, now: NaiveTime) -> bool {
        !self.in_quiet_hours(now)
            && self.enabled.contains(&category)
            && price_change.abs() >= self.min_price_change
    }
}

/// Notification about to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub priority: Priority,
}

impl NewNotification {
    pub fn from_alert(alert: &PriceAlertEvent) -> Self {
        let (title, message) = render_template(alert);
        Self {
            user_id: alert.user_id,
            notification_type: alert.notification_type,
            title,
            message,
            data: json!({
                "skin_id": alert.skin_id,
                "market_hash_name": alert.market_hash_name,
                "old_price": alert.old_price,
                "current_price": alert.current_price,
                "price_change": alert.price_change,
                "target_price": alert.target_price,
                "image_url": alert.skin_image_url,
            }),
            priority: Priority::from_change(alert.price_change),
        }
    }
}

fn render_template(alert: &PriceAlertEvent) -> (String, String) {
    let name = &alert.market_hash_name;
    let change = alert.price_change.abs();
    match alert.notification_type {
        NotificationType::PriceDrop => (
            "Price Drop Alert".to_string(),
            format!(
                "{} dropped {:.2}% to ${:.2}",
                name, change, alert.current_price
            ),
        ),
        NotificationType::PriceIncrease => (
            "Price Increase Alert".to_string(),
            format!(
                "{} increased {:.2}% to ${:.2}",
                name, change, alert.current_price
            ),
        ),
        NotificationType::TargetReached => (
            "Target Price Reached!".to_string(),
            format!(
                "{} reached your target price of ${:.2} (now ${:.2})",
                name,
                alert.target_price.unwrap_or(alert.current_price),
                alert.current_price
            ),
        ),
        NotificationType::SkinDiscovered => (
            "New Skin Discovered".to_string(),
            format!("{} is now tracked at ${:.2}", name, alert.current_price),
        ),
        NotificationType::SystemAlert | NotificationType::WatchlistUpdate => (
            "Watchlist Update".to_string(),
            format!("{} is now ${:.2}", name, alert.current_price),
        ),
    }
}
