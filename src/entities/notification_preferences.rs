//! SeaORM Entity for notification_preferences table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_preferences")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,
    /// Enabled categories as JSON array of strings
    #[sea_orm(column_type = "JsonBinary")]
    pub enabled_types: Json,
    #[sea_orm(column_type = "Decimal(Some((8, 4)))")]
    pub min_price_change: Decimal,
    pub quiet_hours_enabled: bool,
    /// "HH:MM"
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub in_app_enabled: bool,
    pub webhook_enabled: bool,
    pub webhook_url: Option<String>,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
