use std::env;
use std::sync::Arc;

use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentstudio_backend::jobs::run_worker::{
    resume_unfinished_runs, start_run_workers, RunQueue, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS,
};
use agentstudio_backend::services::billing::BillingService;
use agentstudio_backend::services::credits::CreditsService;
use agentstudio_backend::services::generation::FalImageClient;
use agentstudio_backend::services::intent::KeywordIntentClassifier;
use agentstudio_backend::services::runs::AgentRunsService;
use agentstudio_backend::services::stripe::StripeClient;
use agentstudio_backend::{app, AppState};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,agentstudio_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Connect to database
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    tracing::info!("Connecting to database...");
    let db = Database::connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    let stripe_secret = env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY must be set");
    let webhook_secret =
        env::var("STRIPE_WEBHOOK_SECRET").expect("STRIPE_WEBHOOK_SECRET must be set");
    let fal_api_key = env::var("FAL_API_KEY").expect("FAL_API_KEY must be set");
    let fal_base_url = env::var("FAL_BASE_URL").unwrap_or_else(|_| "https://fal.run".to_string());
    let app_base_url =
        env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let workers = env::var("RUN_WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_WORKERS);
    let queue_capacity = env::var("RUN_QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_QUEUE_CAPACITY);

    let credits = CreditsService::new(db.clone());
    let runs = AgentRunsService::new(
        db.clone(),
        credits.clone(),
        Arc::new(FalImageClient::new(fal_api_key, fal_base_url)),
        Arc::new(KeywordIntentClassifier),
    );
    let billing = BillingService::new(
        db.clone(),
        credits.clone(),
        StripeClient::new(stripe_secret, webhook_secret),
        app_base_url,
    );

    let (run_queue, run_rx) = RunQueue::new(queue_capacity);
    start_run_workers(runs.clone(), run_rx, workers);

    // Pick up runs a previous process left behind
    if let Err(e) = resume_unfinished_runs(&runs, &run_queue).await {
        tracing::error!("Failed to resume unfinished runs: {}", e);
    }

    let state = AppState {
        db,
        credits,
        runs,
        billing,
        run_queue,
    };

    let router = app(state);

    // Start server
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind listen address");

    tracing::info!("Server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, router).await.unwrap();
}
