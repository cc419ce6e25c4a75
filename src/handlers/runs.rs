use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::entities::agent_runs;
use crate::handlers::error_response;
use crate::models::error::ErrorResponse;
use crate::models::runs::{RunAgentRequest, RunQueuedResponse, RunStatusResponse};
use crate::AppState;

/// Queue a run for an agent. Returns immediately with status `queued`; a
/// worker drives the steps in the background.
pub async fn run_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<RunAgentRequest>,
) -> Result<(StatusCode, Json<RunQueuedResponse>), (StatusCode, Json<ErrorResponse>)> {
    let (run, estimated_credits) = state
        .runs
        .queue_run(agent_id, payload.user_id)
        .await
        .map_err(error_response)?;

    state
        .run_queue
        .enqueue(run.id)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunQueuedResponse::from_run(&run, estimated_credits)),
    ))
}

pub async fn get_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    let status = state
        .runs
        .get_run_status(run_id)
        .await
        .map_err(error_response)?;
    Ok(Json(status))
}

pub async fn list_user_runs(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<agent_runs::Model>>, (StatusCode, Json<ErrorResponse>)> {
    let runs = state
        .runs
        .list_user_runs(user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(runs))
}
