use std::env;

use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use agentstudio_backend::entities::users;

/// Connect to the integration-test database and bring the schema up to date.
/// Returns `None` when TEST_DATABASE_URL is not set so suites can skip on
/// machines without Postgres.
pub async fn setup_test_db() -> Option<DatabaseConnection> {
    let database_url = env::var("TEST_DATABASE_URL").ok()?;

    let db = Database::connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations on test database");

    Some(db)
}

/// Insert a fresh user with a unique email.
#[allow(dead_code)]
pub async fn create_test_user(db: &DatabaseConnection) -> Uuid {
    let id = Uuid::new_v4();
    users::ActiveModel {
        id: Set(id),
        email: Set(format!("test-{}@example.com", id)),
        stripe_customer_id: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to insert test user");
    id
}
