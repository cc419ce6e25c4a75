//! Migration to create the agents and agent_steps tables

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Agents::Table)
                    .if_not_exists()
                    .col(pk_uuid(Agents::Id))
                    .col(uuid(Agents::UserId))
                    .col(uuid_null(Agents::TemplateId))
                    .col(text(Agents::Name))
                    .col(text(Agents::Instructions))
                    .col(text_null(Agents::ProfileImageUrl))
                    .col(timestamp_with_time_zone(Agents::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(Agents::UpdatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_agents_user_id")
                    .table(Agents::Table)
                    .col(Agents::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_foreign_key(
                ForeignKey::create()
                    .name("fk_agents_user_id")
                    .from(Agents::Table, Agents::UserId)
                    .to(Users::Table, Users::Id)
                    .on_delete(ForeignKeyAction::Cascade)
                    .to_owned(),
            )
            .await?;

        manager
            .create_foreign_key(
                ForeignKey::create()
                    .name("fk_agents_template_id")
                    .from(Agents::Table, Agents::TemplateId)
                    .to(Templates::Table, Templates::Id)
                    .on_delete(ForeignKeyAction::SetNull)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AgentSteps::Table)
                    .if_not_exists()
                    .col(pk_uuid(AgentSteps::Id))
                    .col(uuid(AgentSteps::AgentId))
                    .col(integer(AgentSteps::StepIndex).default(0))
                    .col(text(AgentSteps::Instructions))
                    .col(json_binary_null(AgentSteps::Images))
                    .col(timestamp_with_time_zone(AgentSteps::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(AgentSteps::UpdatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_agent_steps_agent_id")
                    .table(AgentSteps::Table)
                    .col(AgentSteps::AgentId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_foreign_key(
                ForeignKey::create()
                    .name("fk_agent_steps_agent_id")
                    .from(AgentSteps::Table, AgentSteps::AgentId)
                    .to(Agents::Table, Agents::Id)
                    .on_delete(ForeignKeyAction::Cascade)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AgentSteps::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Agents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Agents {
    Table,
    Id,
    UserId,
    TemplateId,
    Name,
    Instructions,
    ProfileImageUrl,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AgentSteps {
    Table,
    Id,
    AgentId,
    StepIndex,
    Instructions,
    Images,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Templates {
    Table,
    Id,
}
