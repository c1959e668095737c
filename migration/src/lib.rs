pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_skins;
mod m20261001_000002_create_price_history;
mod m20261001_000003_create_watchlist;
mod m20261001_000004_create_notifications;
mod m20261001_000005_create_notification_preferences;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_skins::Migration),
            Box::new(m20261001_000002_create_price_history::Migration),
            Box::new(m20261001_000003_create_watchlist::Migration),
            Box::new(m20261001_000004_create_notifications::Migration),
            Box::new(m20261001_000005_create_notification_preferences::Migration),
        ]
    }
}
