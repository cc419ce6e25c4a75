//! Migration to create the agent_runs and agent_run_steps tables

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AgentRuns::Table)
                    .if_not_exists()
                    .col(pk_uuid(AgentRuns::Id))
                    .col(uuid(AgentRuns::AgentId))
                    .col(uuid(AgentRuns::UserId))
                    .col(text(AgentRuns::Status).default("queued"))
                    .col(json_binary_null(AgentRuns::Parameters))
                    .col(text_null(AgentRuns::ErrorMessage))
                    .col(integer(AgentRuns::CreditsUsed).default(0))
                    .col(timestamp_with_time_zone_null(AgentRuns::StartedAt))
                    .col(timestamp_with_time_zone_null(AgentRuns::FinishedAt))
                    .col(timestamp_with_time_zone(AgentRuns::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(AgentRuns::UpdatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_agent_runs_agent_id")
                    .table(AgentRuns::Table)
                    .col(AgentRuns::AgentId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_agent_runs_user_id")
                    .table(AgentRuns::Table)
                    .col(AgentRuns::UserId)
                    .to_owned(),
            )
            .await?;

        // Startup resume scans for queued/running rows
        manager
            .create_index(
                Index::create()
                    .name("idx_agent_runs_status")
                    .table(AgentRuns::Table)
                    .col(AgentRuns::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_foreign_key(
                ForeignKey::create()
                    .name("fk_agent_runs_agent_id")
                    .from(AgentRuns::Table, AgentRuns::AgentId)
                    .to(Agents::Table, Agents::Id)
                    .on_delete(ForeignKeyAction::Cascade)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AgentRunSteps::Table)
                    .if_not_exists()
                    .col(pk_uuid(AgentRunSteps::Id))
                    .col(uuid(AgentRunSteps::AgentRunId))
                    .col(uuid_null(AgentRunSteps::AgentStepId))
                    .col(integer(AgentRunSteps::StepIndex).default(0))
                    .col(text(AgentRunSteps::Status).default("pending"))
                    .col(text_null(AgentRunSteps::Output))
                    .col(json_binary_null(AgentRunSteps::Artifacts))
                    .col(text_null(AgentRunSteps::ErrorMessage))
                    .col(timestamp_with_time_zone_null(AgentRunSteps::StartedAt))
                    .col(timestamp_with_time_zone_null(AgentRunSteps::FinishedAt))
                    .col(timestamp_with_time_zone(AgentRunSteps::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(AgentRunSteps::UpdatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_agent_run_steps_agent_run_id")
                    .table(AgentRunSteps::Table)
                    .col(AgentRunSteps::AgentRunId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_foreign_key(
                ForeignKey::create()
                    .name("fk_agent_run_steps_agent_run_id")
                    .from(AgentRunSteps::Table, AgentRunSteps::AgentRunId)
                    .to(AgentRuns::Table, AgentRuns::Id)
                    .on_delete(ForeignKeyAction::Cascade)
                    .to_owned(),
            )
            .await?;

        // Step templates may be deleted while a run is in flight
        manager
            .create_foreign_key(
                ForeignKey::create()
                    .name("fk_agent_run_steps_agent_step_id")
                    .from(AgentRunSteps::Table, AgentRunSteps::AgentStepId)
                    .to(AgentSteps::Table, AgentSteps::Id)
                    .on_delete(ForeignKeyAction::SetNull)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AgentRunSteps::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AgentRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AgentRuns {
    Table,
    Id,
    AgentId,
    UserId,
    Status,
    Parameters,
    ErrorMessage,
    CreditsUsed,
    StartedAt,
    FinishedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AgentRunSteps {
    Table,
    Id,
    AgentRunId,
    AgentStepId,
    StepIndex,
    Status,
    Output,
    Artifacts,
    ErrorMessage,
    StartedAt,
    FinishedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Agents {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum AgentSteps {
    Table,
    Id,
}
