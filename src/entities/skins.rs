//! SeaORM Entity for the skins table
//!
//! One row per tradable item. Rows are weapon-partitioned across shards.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "skins")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Marketplace name, e.g. "AK-47 | Redline (Field-Tested)"
    #[sea_orm(unique)]
    pub market_hash_name: String,
    /// URL slug derived from name + quality
    #[sea_orm(unique)]
    pub slug: String,
    pub name: String,
    /// Weapon string, drives shard routing
    pub weapon: String,
    pub quality: String,
    pub rarity: String,
    pub image_url: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub current_price: Decimal,
    pub currency: String,
    pub volume_24h: i64,
    #[sea_orm(column_type = "Decimal(Some((16, 8)))")]
    pub price_change_24h: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 8)))")]
    pub price_change_7d: Decimal,
    /// 0 until the first price is recorded
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub lowest_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub highest_price: Decimal,
    pub last_updated: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
