pub use super::notification_preferences::Entity as NotificationPreferences;
pub use super::notifications::Entity as Notifications;
pub use super::price_history::Entity as PriceHistory;
pub use super::skins::Entity as Skins;
pub use super::watchlist::Entity as Watchlist;
