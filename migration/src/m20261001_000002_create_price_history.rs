use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PriceHistory::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(PriceHistory::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(PriceHistory::SkinId).uuid().not_null())
                    .col(ColumnDef::new(PriceHistory::Price).decimal_len(16, 4).not_null())
                    .col(
                        ColumnDef::new(PriceHistory::Volume)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PriceHistory::Source)
                            .string_len(50)
                            .not_null()
                            .default("steam"),
                    )
                    .col(
                        ColumnDef::new(PriceHistory::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_price_history_skin")
                            .from(PriceHistory::Table, PriceHistory::SkinId)
                            .to(Skins::Table, Skins::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // History reads and the 7d baseline are per skin, newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_price_history_skin_recorded")
                    .table(PriceHistory::Table)
                    .col(PriceHistory::SkinId)
                    .col(PriceHistory::RecordedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_price_history_recorded_at")
                    .table(PriceHistory::Table)
                    .col(PriceHistory::RecordedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PriceHistory::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum PriceHistory {
    Table,
    Id,
    SkinId,
    Price,
    Volume,
    Source,
    RecordedAt,
}

#[derive(Iden)]
enum Skins {
    Table,
    Id,
}
