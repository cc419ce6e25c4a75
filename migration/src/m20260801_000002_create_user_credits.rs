//! Migration to create the user_credits table (one balance row per user)

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserCredits::Table)
                    .if_not_exists()
                    .col(pk_uuid(UserCredits::Id))
                    .col(uuid_uniq(UserCredits::UserId))
                    .col(integer(UserCredits::Balance).default(100))
                    .col(integer(UserCredits::TotalEarned).default(0))
                    .col(integer(UserCredits::TotalSpent).default(0))
                    .col(timestamp_with_time_zone(UserCredits::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(UserCredits::UpdatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        manager
            .create_foreign_key(
                ForeignKey::create()
                    .name("fk_user_credits_user_id")
                    .from(UserCredits::Table, UserCredits::UserId)
                    .to(Users::Table, Users::Id)
                    .on_delete(ForeignKeyAction::Cascade)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserCredits::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserCredits {
    Table,
    Id,
    UserId,
    Balance,
    TotalEarned,
    TotalSpent,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
