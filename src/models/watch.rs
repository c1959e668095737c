//! Watch evaluation against a new price

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::watchlist;
use crate::models::events::NotificationType;

/// Input for UpsertWatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWatch {
    pub user_id: Uuid,
    pub skin_id: Uuid,
    pub target_price: Option<Decimal>,
    pub notify_on_drop: bool,
    pub notify_on_target: bool,
}

/// Active AND ((drop flag AND new < old) OR (target flag AND new <= target))
pub fn should_notify(watch: &watchlist::Model, old_price: Decimal, new_price: Decimal) -> bool {
    watch.is_active && (drop_triggered(watch, old_price, new_price) || target_triggered(watch, new_price))
}

/// Category of the alert a watch produces, `None` when it should stay quiet
pub fn alert_type(
    watch: &watchlist::Model,
    old_price: Decimal,
    new_price: Decimal,
) -> Option<NotificationType> {
    if !should_notify(watch, old_price, new_price) {
        return None;
    }

    if target_triggered(watch, new_price) {
        Some(NotificationType::TargetReached)
    } else if new_price < old_price {
        Some(NotificationType::PriceDrop)
    } else {
        Some(NotificationType::PriceIncrease)
    }
}

fn drop_triggered(watch: &watchlist::Model, old_price: Decimal, new_price: Decimal) -> bool {
    watch.notify_on_drop && new_price < old_price
}

fn target_triggered(watch: &watchlist::Model, new_price: Decimal) -> bool {
    watch.notify_on_target && matches!(watch.target_price, Some(target) if new_price <= target)
}
