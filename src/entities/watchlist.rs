//! SeaORM Entity for watchlist table
//!
//! Lives on the same shard as the watched skin.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "watchlist")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub skin_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub target_price: Option<Decimal>,
    pub notify_on_drop: bool,
    pub notify_on_target: bool,
    /// Soft delete flag, rows are kept for audit
    pub is_active: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
