use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Skins::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Skins::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Skins::MarketHashName)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Skins::Slug).string_len(255).not_null().unique_key())
                    .col(ColumnDef::new(Skins::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Skins::Weapon).string_len(100).not_null())
                    .col(ColumnDef::new(Skins::Quality).string_len(50).not_null())
                    .col(ColumnDef::new(Skins::Rarity).string_len(50).not_null())
                    .col(ColumnDef::new(Skins::ImageUrl).text().null())
                    .col(
                        ColumnDef::new(Skins::CurrentPrice)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Skins::Currency)
                            .string_len(3)
                            .not_null()
                            .default("USD"),
                    )
                    .col(
                        ColumnDef::new(Skins::Volume24h)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Skins::PriceChange24h)
                            .decimal_len(16, 8)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Skins::PriceChange7d)
                            .decimal_len(16, 8)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Skins::LowestPrice)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Skins::HighestPrice)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Skins::LastUpdated)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Skins::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Skins::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Ranking queries sort on these
        manager
            .create_index(
                Index::create()
                    .name("idx_skins_weapon")
                    .table(Skins::Table)
                    .col(Skins::Weapon)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_skins_price_change_24h")
                    .table(Skins::Table)
                    .col(Skins::PriceChange24h)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_skins_volume_24h")
                    .table(Skins::Table)
                    .col(Skins::Volume24h)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Skins::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Skins {
    Table,
    Id,
    MarketHashName,
    Slug,
    Name,
    Weapon,
    Quality,
    Rarity,
    ImageUrl,
    CurrentPrice,
    Currency,
    #[iden = "volume_24h"]
    Volume24h,
    #[iden = "price_change_24h"]
    PriceChange24h,
    #[iden = "price_change_7d"]
    PriceChange7d,
    LowestPrice,
    HighestPrice,
    LastUpdated,
    CreatedAt,
    UpdatedAt,
}
