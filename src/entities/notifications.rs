//! SeaORM Entity for notifications table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    /// price_drop, price_increase, target_reached, ...
    pub notification_type: String,
    pub title: String,
    pub message: String,
    /// skin_id, prices, change and image url
    #[sea_orm(column_type = "JsonBinary")]
    pub data: Json,
    /// low, normal, high, urgent
    pub priority: String,
    pub is_read: bool,
    pub created_at: DateTimeWithTimeZone,
    pub read_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
