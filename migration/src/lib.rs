pub use sea_orm_migration::prelude::*;

mod m20260801_000001_create_users;
mod m20260801_000002_create_user_credits;
mod m20260801_000003_create_credit_transactions;
mod m20260802_000001_create_templates;
mod m20260802_000002_create_agents;
mod m20260803_000001_create_agent_runs;
mod m20260804_000001_create_subscriptions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260801_000001_create_users::Migration),
            Box::new(m20260801_000002_create_user_credits::Migration),
            Box::new(m20260801_000003_create_credit_transactions::Migration),
            Box::new(m20260802_000001_create_templates::Migration),
            Box::new(m20260802_000002_create_agents::Migration),
            Box::new(m20260803_000001_create_agent_runs::Migration),
            Box::new(m20260804_000001_create_subscriptions::Migration),
        ]
    }
}
