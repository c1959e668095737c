use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(NotificationPreferences::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationPreferences::UserId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(NotificationPreferences::EnabledTypes)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationPreferences::MinPriceChange)
                            .decimal_len(8, 4)
                            .not_null()
                            .default(5),
                    )
                    .col(
                        ColumnDef::new(NotificationPreferences::QuietHoursEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(NotificationPreferences::QuietHoursStart).string_len(5).null())
                    .col(ColumnDef::new(NotificationPreferences::QuietHoursEnd).string_len(5).null())
                    .col(
                        ColumnDef::new(NotificationPreferences::EmailEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(NotificationPreferences::PushEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(NotificationPreferences::InAppEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(NotificationPreferences::WebhookEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(NotificationPreferences::WebhookUrl).text().null())
                    .col(
                        ColumnDef::new(NotificationPreferences::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(NotificationPreferences::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum NotificationPreferences {
    Table,
    UserId,
    EnabledTypes,
    MinPriceChange,
    QuietHoursEnabled,
    QuietHoursStart,
    QuietHoursEnd,
    EmailEnabled,
    PushEnabled,
    InAppEnabled,
    WebhookEnabled,
    WebhookUrl,
    UpdatedAt,
}
