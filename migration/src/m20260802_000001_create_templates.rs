//! Migration to create the templates table (style prompts + reference images)

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Templates::Table)
                    .if_not_exists()
                    .col(pk_uuid(Templates::Id))
                    .col(text(Templates::Prompt))
                    .col(json_binary_null(Templates::Images))
                    .col(timestamp_with_time_zone(Templates::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(Templates::UpdatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Templates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Templates {
    Table,
    Id,
    Prompt,
    Images,
    CreatedAt,
    UpdatedAt,
}
