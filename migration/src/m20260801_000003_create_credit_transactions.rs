//! Migration to create the credit_transactions ledger table
//!
//! Entries are append-only; balance_after lets the balance be reconstructed
//! by replaying the log in creation order.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CreditTransactions::Table)
                    .if_not_exists()
                    .col(pk_uuid(CreditTransactions::Id))
                    .col(uuid(CreditTransactions::UserId))
                    .col(text(CreditTransactions::Kind))
                    .col(integer(CreditTransactions::Amount))
                    .col(integer(CreditTransactions::BalanceAfter))
                    .col(text_null(CreditTransactions::Description))
                    .col(text_null(CreditTransactions::RelatedJobId))
                    .col(text_null(CreditTransactions::RelatedJobType))
                    .col(json_binary_null(CreditTransactions::Metadata))
                    .col(text_null(CreditTransactions::StripeSessionId))
                    .col(text_null(CreditTransactions::StripePaymentIntentId))
                    .col(text_null(CreditTransactions::StripeChargeId))
                    .col(text_null(CreditTransactions::StripeInvoiceId))
                    .col(text_null(CreditTransactions::StripeProductId))
                    .col(text_null(CreditTransactions::StripePriceId))
                    .col(timestamp_with_time_zone(CreditTransactions::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(CreditTransactions::UpdatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_credit_transactions_user_id")
                    .table(CreditTransactions::Table)
                    .col(CreditTransactions::UserId)
                    .to_owned(),
            )
            .await?;

        // Refund events look transactions up by payment intent
        manager
            .create_index(
                Index::create()
                    .name("idx_credit_transactions_payment_intent")
                    .table(CreditTransactions::Table)
                    .col(CreditTransactions::StripePaymentIntentId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_foreign_key(
                ForeignKey::create()
                    .name("fk_credit_transactions_user_id")
                    .from(CreditTransactions::Table, CreditTransactions::UserId)
                    .to(Users::Table, Users::Id)
                    .on_delete(ForeignKeyAction::Cascade)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CreditTransactions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CreditTransactions {
    Table,
    Id,
    UserId,
    Kind,
    Amount,
    BalanceAfter,
    Description,
    RelatedJobId,
    RelatedJobType,
    Metadata,
    StripeSessionId,
    StripePaymentIntentId,
    StripeChargeId,
    StripeInvoiceId,
    StripeProductId,
    StripePriceId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
