// src/lib.rs

use axum::routing::{get, post};
use axum::Router;
use sea_orm::DatabaseConnection;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use jobs::run_worker::RunQueue;
use services::billing::BillingService;
use services::credits::CreditsService;
use services::runs::AgentRunsService;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub credits: CreditsService,
    pub runs: AgentRunsService,
    pub billing: BillingService,
    pub run_queue: RunQueue,
}

pub mod entities {
    pub mod prelude;

    pub mod agent_run_steps;
    pub mod agent_runs;
    pub mod agent_steps;
    pub mod agents;
    pub mod credit_transactions;
    pub mod subscriptions;
    pub mod templates;
    pub mod user_credits;
    pub mod users;
}

pub mod services {
    pub mod billing;
    pub mod credits;
    pub mod generation;
    pub mod intent;
    pub mod redact;
    pub mod runs;
    pub mod stripe;
}

pub mod errors;
pub mod handlers;
pub mod jobs;
pub mod models;

/// Full API router. Kept in the library so integration tests can mount it
/// without going through `main`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/users", post(handlers::users::create_user))
        .route(
            "/api/users/{user_id}/credits",
            get(handlers::credits::get_balance),
        )
        .route(
            "/api/users/{user_id}/credits/history",
            get(handlers::credits::get_history),
        )
        .route("/api/credits/grant", post(handlers::credits::grant_credits))
        .route("/api/agents", post(handlers::agents::create_agent))
        .route(
            "/api/agents/{agent_id}",
            get(handlers::agents::get_agent).put(handlers::agents::update_agent),
        )
        .route(
            "/api/users/{user_id}/agents",
            get(handlers::agents::list_user_agents),
        )
        .route("/api/agents/{agent_id}/run", post(handlers::runs::run_agent))
        .route("/api/runs/{run_id}", get(handlers::runs::get_run_status))
        .route("/api/users/{user_id}/runs", get(handlers::runs::list_user_runs))
        .route(
            "/api/billing/checkout/credits",
            post(handlers::billing::create_credits_checkout),
        )
        .route(
            "/api/billing/checkout/subscription",
            post(handlers::billing::create_subscription_checkout),
        )
        .route(
            "/api/users/{user_id}/subscriptions",
            get(handlers::billing::list_subscriptions),
        )
        .route("/api/webhooks/stripe", post(handlers::billing::stripe_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
