use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Watchlist::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Watchlist::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Watchlist::UserId).uuid().not_null())
                    .col(ColumnDef::new(Watchlist::SkinId).uuid().not_null())
                    .col(ColumnDef::new(Watchlist::TargetPrice).decimal_len(16, 4).null())
                    .col(
                        ColumnDef::new(Watchlist::NotifyOnDrop)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Watchlist::NotifyOnTarget)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Watchlist::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Watchlist::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Watchlist::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_watchlist_skin")
                            .from(Watchlist::Table, Watchlist::SkinId)
                            .to(Skins::Table, Skins::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_watchlist_skin_active")
                    .table(Watchlist::Table)
                    .col(Watchlist::SkinId)
                    .col(Watchlist::IsActive)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // At most one active watch per (user, skin); soft-deleted rows are kept
        if manager.get_database_backend() == DatabaseBackend::Postgres {
            manager
                .get_connection()
                .execute_unprepared(
                    r#"
                    CREATE UNIQUE INDEX IF NOT EXISTS idx_watchlist_user_skin_active
                    ON watchlist (user_id, skin_id)
                    WHERE is_active
                    "#,
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Watchlist::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Watchlist {
    Table,
    Id,
    UserId,
    SkinId,
    TargetPrice,
    NotifyOnDrop,
    NotifyOnTarget,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Skins {
    Table,
    Id,
}
