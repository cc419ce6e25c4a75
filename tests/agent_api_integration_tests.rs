mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use agentstudio_backend::jobs::run_worker::{RunQueue, DEFAULT_QUEUE_CAPACITY};
use agentstudio_backend::services::billing::BillingService;
use agentstudio_backend::services::credits::CreditsService;
use agentstudio_backend::services::generation::FalImageClient;
use agentstudio_backend::services::intent::KeywordIntentClassifier;
use agentstudio_backend::services::runs::AgentRunsService;
use agentstudio_backend::services::stripe::StripeClient;
use agentstudio_backend::{app, AppState};

use crate::common::setup_test_db;

fn build_test_router(db: DatabaseConnection) -> Router {
    let credits = CreditsService::new(db.clone());
    let runs = AgentRunsService::new(
        db.clone(),
        credits.clone(),
        Arc::new(FalImageClient::new(
            "test_api_key".to_string(),
            "http://localhost:9".to_string(),
        )),
        Arc::new(KeywordIntentClassifier),
    );
    let billing = BillingService::new(
        db.clone(),
        credits.clone(),
        StripeClient::new("sk_test_key".to_string(), "whsec_test".to_string()),
        "http://localhost:3000".to_string(),
    );
    let (run_queue, _rx) = RunQueue::new(DEFAULT_QUEUE_CAPACITY);

    app(AppState {
        db,
        credits,
        runs,
        billing,
        run_queue,
    })
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post_json(router: &Router, uri: &str, payload: Value) -> axum::response::Response {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn put_json(router: &Router, uri: &str, payload: Value) -> axum::response::Response {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(router: &Router, uri: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn register_user(router: &Router) -> String {
    let email = format!("agents-{}@example.com", Uuid::new_v4());
    let response = post_json(router, "/api/users", json!({ "email": email })).await;
    assert_eq!(response.status(), StatusCode::OK);
    response_json(response).await["id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn create_agent_stores_steps_in_payload_order() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let router = build_test_router(db);
    let user_id = register_user(&router).await;

    let response = post_json(
        &router,
        "/api/agents",
        json!({
            "userId": user_id,
            "name": "Meeting notes assistant",
            "instructions": "You summarize meeting notes",
            "steps": [
                { "instructions": "Summarize the notes" },
                { "instructions": "Draft follow-up tasks" },
            ],
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;

    assert_eq!(body["name"], "Meeting notes assistant");
    let steps = body["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0]["stepIndex"], 0);
    assert_eq!(steps[0]["instructions"], "Summarize the notes");
    assert_eq!(steps[1]["stepIndex"], 1);
    assert_eq!(steps[1]["instructions"], "Draft follow-up tasks");

    // Fetching it back returns the same ordered list.
    let agent_id = body["id"].as_str().unwrap();
    let response = get(&router, &format!("/api/agents/{}", agent_id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let steps = body["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0]["instructions"], "Summarize the notes");
}

/// An update carrying a step list replaces the stored list wholesale, with
/// fresh dense indexes in payload order.
#[tokio::test]
async fn update_with_steps_replaces_the_whole_list() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let router = build_test_router(db);
    let user_id = register_user(&router).await;

    let response = post_json(
        &router,
        "/api/agents",
        json!({
            "userId": user_id,
            "name": "Drafting assistant",
            "instructions": "You draft short texts",
            "steps": [
                { "instructions": "Summarize the notes" },
                { "instructions": "Draft follow-up tasks" },
            ],
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    let agent_id = body["id"].as_str().unwrap().to_string();
    let old_step_ids: Vec<String> = body["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect();

    let response = put_json(
        &router,
        &format!("/api/agents/{}", agent_id),
        json!({
            "userId": user_id,
            "name": "Editing assistant",
            "steps": [
                { "instructions": "Proofread the draft" },
                { "instructions": "Tighten the opening" },
                { "instructions": "Check the closing" },
            ],
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;

    assert_eq!(body["name"], "Editing assistant");
    // Untouched fields survive the partial update.
    assert_eq!(body["instructions"], "You draft short texts");

    let steps = body["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 3);
    for (index, step) in steps.iter().enumerate() {
        assert_eq!(step["stepIndex"], index as i64);
        assert!(!old_step_ids.contains(&step["id"].as_str().unwrap().to_string()));
    }
    assert_eq!(steps[0]["instructions"], "Proofread the draft");
    assert_eq!(steps[2]["instructions"], "Check the closing");
}

/// An update without a step list leaves the stored steps untouched.
#[tokio::test]
async fn update_without_steps_keeps_existing_steps() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let router = build_test_router(db);
    let user_id = register_user(&router).await;

    let response = post_json(
        &router,
        "/api/agents",
        json!({
            "userId": user_id,
            "name": "Drafting assistant",
            "instructions": "You draft short texts",
            "steps": [{ "instructions": "Summarize the notes" }],
        }),
    )
    .await;
    let body = response_json(response).await;
    let agent_id = body["id"].as_str().unwrap().to_string();
    let step_id = body["steps"][0]["id"].as_str().unwrap().to_string();

    let response = put_json(
        &router,
        &format!("/api/agents/{}", agent_id),
        json!({ "userId": user_id, "name": "Renamed assistant" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;

    assert_eq!(body["name"], "Renamed assistant");
    let steps = body["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["id"], step_id.as_str());
}

/// Updates are scoped to the owner; another user's id gets a 404, not a
/// cross-tenant write.
#[tokio::test]
async fn update_by_non_owner_is_404() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let router = build_test_router(db);
    let owner_id = register_user(&router).await;
    let other_id = register_user(&router).await;

    let response = post_json(
        &router,
        "/api/agents",
        json!({
            "userId": owner_id,
            "name": "Drafting assistant",
            "instructions": "You draft short texts",
        }),
    )
    .await;
    let body = response_json(response).await;
    let agent_id = body["id"].as_str().unwrap().to_string();

    let response = put_json(
        &router,
        &format!("/api/agents/{}", agent_id),
        json!({ "userId": other_id, "name": "Hijacked" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(&router, &format!("/api/agents/{}", agent_id)).await;
    let body = response_json(response).await;
    assert_eq!(body["name"], "Drafting assistant");
}

#[tokio::test]
async fn list_user_agents_returns_only_own_agents() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let router = build_test_router(db);
    let user_id = register_user(&router).await;
    let other_id = register_user(&router).await;

    for name in ["First agent", "Second agent"] {
        let response = post_json(
            &router,
            "/api/agents",
            json!({
                "userId": user_id,
                "name": name,
                "instructions": "You draft short texts",
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    post_json(
        &router,
        "/api/agents",
        json!({
            "userId": other_id,
            "name": "Someone else's agent",
            "instructions": "You draft short texts",
        }),
    )
    .await;

    let response = get(&router, &format!("/api/users/{}/agents", user_id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let agents = body.as_array().unwrap();
    assert_eq!(agents.len(), 2);
    let names: Vec<&str> = agents.iter().map(|a| a["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"First agent"));
    assert!(names.contains(&"Second agent"));
}

#[tokio::test]
async fn get_unknown_agent_is_404() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let router = build_test_router(db);

    let response = get(&router, &format!("/api/agents/{}", Uuid::new_v4())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
