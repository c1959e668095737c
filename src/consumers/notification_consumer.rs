//! Notification Consumer
//!
//! Consumes price alerts: drops duplicates inside the dedup window,
//! applies the user's preferences, persists the notification and
//! dispatches it through the enabled channels. The dedup marker is only
//! written once a notification was actually persisted, so alerts
//! suppressed by preferences never block later ones.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::consumers::MessageHandler;
use crate::error::Result;
use crate::models::events::PriceAlertEvent;
use crate::models::notification::{NewNotification, Preferences};
use crate::services::cache::{Cache, keys, ttl};
use crate::services::event_bus::BusMessage;
use crate::services::item_store::ItemRepository;
use crate::services::notification_channels::ChannelDispatcher;

/// Time source for quiet-hours evaluation. Quiet hours are wall-clock
/// times, so `now` is expressed in the zone they are written in.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Host clock in the host's local zone, or at a fixed UTC offset when one
/// is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    offset: Option<FixedOffset>,
}

impl SystemClock {
    pub fn new(offset: Option<FixedOffset>) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        match self.offset {
            Some(offset) => Utc::now().with_timezone(&offset),
            None => Local::now().fixed_offset(),
        }
    }
}

pub struct NotificationConsumer {
    store: Arc<dyn ItemRepository>,
    cache: Arc<dyn Cache>,
    dispatcher: ChannelDispatcher,
    clock: Arc<dyn Clock>,
}

impl NotificationConsumer {
    pub fn new(store: Arc<dyn ItemRepository>, cache: Arc<dyn Cache>, dispatcher: ChannelDispatcher) -> Self {
        Self::with_clock(store, cache, dispatcher, Arc::new(SystemClock::default()))
    }

    pub fn with_clock(
        store: Arc<dyn ItemRepository>,
        cache: Arc<dyn Cache>,
        dispatcher: ChannelDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache,
            dispatcher,
            clock,
        }
    }
}

#[async_trait]
impl MessageHandler for NotificationConsumer {
    fn name(&self) -> &'static str {
        "notification-consumer"
    }

    async fn handle(&self, message: &BusMessage) -> Result<()> {
        let alert: PriceAlertEvent = message.decode()?;
        let dedup_key = keys::alert_sent(alert.user_id, alert.skin_id);

        if self.cache.exists(&dedup_key).await? {
            debug!(user_id = %alert.user_id, skin_id = %alert.skin_id, "Duplicate alert within window, skipping");
            return Ok(());
        }

        let preferences = self
            .store
            .get_preferences(alert.user_id)
            .await?
            .map(|model| Preferences::from_model(&model))
            .unwrap_or_default();

        let category = alert.notification_type.category();
        let now = self.clock.now().time();
        if !preferences.should_send(category, alert.price_change, now) {
            debug!(
                user_id = %alert.user_id,
                category = category.as_str(),
                price_change = alert.price_change,
                quiet_hours = preferences.in_quiet_hours(now),
                "Alert filtered by preferences"
            );
            return Ok(());
        }

        let notification = self
            .store
            .create_notification(NewNotification::from_alert(&alert))
            .await?;

        let report = self.dispatcher.dispatch(&notification, &preferences).await;

        if let Err(e) = self.cache.set(&dedup_key, "1", Some(ttl::ALERT_SENT)).await {
            warn!(key = %dedup_key, error = %e, "Failed to set alert dedup marker");
        }

        info!(
            notification_id = %notification.id,
            user_id = %alert.user_id,
            notification_type = alert.notification_type.as_str(),
            priority = %notification.priority,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Notification sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_uses_configured_offset() {
        let plus_three = FixedOffset::east_opt(3 * 3600).unwrap();
        let now = SystemClock::new(Some(plus_three)).now();
        assert_eq!(*now.offset(), plus_three);

        let expected = Utc::now().with_timezone(&plus_three);
        assert!((now - expected).num_seconds().abs() < 5);
    }

    #[test]
    fn test_system_clock_defaults_to_host_zone() {
        let now = SystemClock::default().now();
        assert_eq!(*now.offset(), *Local::now().offset());
    }
}
