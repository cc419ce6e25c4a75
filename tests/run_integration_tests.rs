mod common;

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use uuid::Uuid;

use agentstudio_backend::entities::agent_run_steps::RunStepStatus;
use agentstudio_backend::entities::agent_runs::{self, RunStatus};
use agentstudio_backend::entities::credit_transactions::{self, TransactionKind};
use agentstudio_backend::entities::prelude::*;
use agentstudio_backend::entities::{agent_steps, agents};
use agentstudio_backend::errors::{Result, ServiceError};
use agentstudio_backend::services::credits::{CreditsService, WELCOME_GRANT};
use agentstudio_backend::services::generation::{
    GenerateImageRequest, GeneratedImage, ImageGenerator,
};
use agentstudio_backend::services::intent::KeywordIntentClassifier;
use agentstudio_backend::services::runs::AgentRunsService;

use crate::common::{create_test_user, setup_test_db};

struct StubGenerator;

#[async_trait]
impl ImageGenerator for StubGenerator {
    async fn generate(&self, _request: GenerateImageRequest) -> Result<GeneratedImage> {
        Ok(GeneratedImage {
            url: "https://cdn.example/generated.png".to_string(),
            width: 1024,
            height: 1024,
            seed: Some(42),
        })
    }
}

struct FailingGenerator;

#[async_trait]
impl ImageGenerator for FailingGenerator {
    async fn generate(&self, _request: GenerateImageRequest) -> Result<GeneratedImage> {
        Err(ServiceError::GenerationFailed(
            "provider unavailable".to_string(),
        ))
    }
}

fn runs_service(db: &DatabaseConnection, generator: Arc<dyn ImageGenerator>) -> AgentRunsService {
    AgentRunsService::new(
        db.clone(),
        CreditsService::new(db.clone()),
        generator,
        Arc::new(KeywordIntentClassifier),
    )
}

async fn create_agent_with_steps(
    db: &DatabaseConnection,
    user_id: Uuid,
    instructions: &str,
    steps: &[&str],
) -> Uuid {
    let agent = agents::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        template_id: Set(None),
        name: Set("test agent".to_string()),
        instructions: Set(instructions.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to insert agent");

    for (index, step) in steps.iter().enumerate() {
        agent_steps::ActiveModel {
            id: Set(Uuid::new_v4()),
            agent_id: Set(agent.id),
            step_index: Set(index as i32),
            instructions: Set(step.to_string()),
            images: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to insert agent step");
    }

    agent.id
}

/// Three text steps run to completion in order and settle 15 credits exactly
/// once.
#[tokio::test]
async fn run_executes_steps_in_order_and_settles_once() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let credits = CreditsService::new(db.clone());
    let runs = runs_service(&db, Arc::new(StubGenerator));

    let user_id = create_test_user(&db).await;
    credits.ensure_user_credits(user_id).await.unwrap();
    let agent_id = create_agent_with_steps(
        &db,
        user_id,
        "You summarize meeting notes",
        &[
            "Summarize the notes",
            "Draft follow-up tasks",
            "Proofread the draft",
        ],
    )
    .await;

    let (run, estimated) = runs.queue_run(agent_id, user_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(estimated, 15);

    runs.process_run(run.id).await;

    let status = runs.get_run_status(run.id).await.unwrap();
    assert_eq!(status.status, RunStatus::Succeeded);
    assert_eq!(status.credits_used, 15);
    assert_eq!(status.steps.len(), 3);

    for (index, step) in status.steps.iter().enumerate() {
        assert_eq!(step.step_index, index as i32);
        assert_eq!(step.status, RunStepStatus::Succeeded);
    }
    // Sequential execution: each step starts at or after the previous one
    // finished.
    for pair in status.steps.windows(2) {
        assert!(pair[1].started_at.unwrap() >= pair[0].finished_at.unwrap());
    }

    let balance = credits.get_user_credits(user_id).await.unwrap();
    assert_eq!(balance.balance, WELCOME_GRANT - 15);

    let usage_entries = CreditTransactions::find()
        .filter(credit_transactions::Column::UserId.eq(user_id))
        .filter(credit_transactions::Column::Kind.eq(TransactionKind::Usage))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(usage_entries.len(), 1);
    assert_eq!(usage_entries[0].amount, -15);
    assert_eq!(
        usage_entries[0].related_job_id.as_deref(),
        Some(run.id.to_string().as_str())
    );
}

/// An uncoverable estimate blocks the run before any row is written.
#[tokio::test]
async fn insufficient_credits_creates_no_run() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let credits = CreditsService::new(db.clone());
    let runs = runs_service(&db, Arc::new(StubGenerator));

    let user_id = create_test_user(&db).await;
    credits.ensure_user_credits(user_id).await.unwrap();

    // 21 text steps at 5 credits each overruns the 100-credit welcome grant.
    let steps: Vec<String> = (0..21).map(|i| format!("Summarize section {}", i)).collect();
    let step_refs: Vec<&str> = steps.iter().map(|s| s.as_str()).collect();
    let agent_id =
        create_agent_with_steps(&db, user_id, "You summarize long documents", &step_refs).await;

    let err = runs.queue_run(agent_id, user_id).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::InsufficientCredits { needed: 105 }
    ));

    let run_count = AgentRuns::find()
        .filter(agent_runs::Column::UserId.eq(user_id))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(run_count, 0);

    let balance = credits.get_user_credits(user_id).await.unwrap();
    assert_eq!(balance.balance, WELCOME_GRANT);
}

/// A failing image step is recorded on the step; the run still succeeds and
/// only the completed steps are charged.
#[tokio::test]
async fn step_failure_does_not_abort_the_run() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let credits = CreditsService::new(db.clone());
    let runs = runs_service(&db, Arc::new(FailingGenerator));

    let user_id = create_test_user(&db).await;
    credits.ensure_user_credits(user_id).await.unwrap();
    let agent_id = create_agent_with_steps(
        &db,
        user_id,
        "You summarize meeting notes",
        &[
            "Summarize the notes",
            "Generate image of a mountain sunset",
            "Proofread the draft",
        ],
    )
    .await;

    let (run, estimated) = runs.queue_run(agent_id, user_id).await.unwrap();
    assert_eq!(estimated, 25);

    runs.process_run(run.id).await;

    let status = runs.get_run_status(run.id).await.unwrap();
    assert_eq!(status.status, RunStatus::Succeeded);
    // Two completed text steps; the failed image step contributes nothing.
    assert_eq!(status.credits_used, 10);

    assert_eq!(status.steps[0].status, RunStepStatus::Succeeded);
    assert_eq!(status.steps[1].status, RunStepStatus::Failed);
    assert_eq!(status.steps[2].status, RunStepStatus::Succeeded);
    assert!(status.steps[1]
        .error_message
        .as_deref()
        .unwrap()
        .contains("Image generation failed"));

    let balance = credits.get_user_credits(user_id).await.unwrap();
    assert_eq!(balance.balance, WELCOME_GRANT - 10);
}

/// A successful image step stores the image artifact and charges 15 credits.
#[tokio::test]
async fn image_step_records_artifact() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let credits = CreditsService::new(db.clone());
    let runs = runs_service(&db, Arc::new(StubGenerator));

    let user_id = create_test_user(&db).await;
    credits.ensure_user_credits(user_id).await.unwrap();
    let agent_id = create_agent_with_steps(
        &db,
        user_id,
        "You summarize meeting notes",
        &["Generate image of a mountain sunset"],
    )
    .await;

    let (run, estimated) = runs.queue_run(agent_id, user_id).await.unwrap();
    assert_eq!(estimated, 15);

    runs.process_run(run.id).await;

    let status = runs.get_run_status(run.id).await.unwrap();
    assert_eq!(status.status, RunStatus::Succeeded);
    assert_eq!(status.credits_used, 15);

    let artifact = status.steps[0].artifacts.as_ref().unwrap();
    assert_eq!(artifact["type"], "image");
    assert_eq!(artifact["url"], "https://cdn.example/generated.png");
    assert_eq!(artifact["width"], 1024);
}

/// Queued runs from a previous process show up for startup resume.
#[tokio::test]
async fn unfinished_runs_are_listed_for_resume() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let credits = CreditsService::new(db.clone());
    let runs = runs_service(&db, Arc::new(StubGenerator));

    let user_id = create_test_user(&db).await;
    credits.ensure_user_credits(user_id).await.unwrap();
    let agent_id =
        create_agent_with_steps(&db, user_id, "You summarize meeting notes", &["Summarize"]).await;

    let (run, _) = runs.queue_run(agent_id, user_id).await.unwrap();

    let unfinished = runs.unfinished_run_ids().await.unwrap();
    assert!(unfinished.contains(&run.id));

    runs.process_run(run.id).await;

    let unfinished = runs.unfinished_run_ids().await.unwrap();
    assert!(!unfinished.contains(&run.id));
}
