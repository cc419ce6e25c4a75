//! Migration to create the users table
//!
//! Auth itself lives at the edge; the backend only needs the user row to hang
//! credits, agents and Stripe customer ids off.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(pk_uuid(Users::Id))
                    .col(text_uniq(Users::Email))
                    .col(text_null(Users::StripeCustomerId))
                    .col(timestamp_with_time_zone(Users::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(Users::UpdatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        // Webhooks resolve users by Stripe customer id
        manager
            .create_index(
                Index::create()
                    .name("idx_users_stripe_customer_id")
                    .table(Users::Table)
                    .col(Users::StripeCustomerId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Email,
    StripeCustomerId,
    CreatedAt,
    UpdatedAt,
}
