//! Agent and step management
//!
//! Steps are stored as an ordered list under the agent. Updates that carry a
//! step list replace the whole list (delete then insert) so `step_index` is
//! always dense and matches the order the client sent.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, Order, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use uuid::Uuid;

use crate::entities::prelude::*;
use crate::entities::{agent_steps, agents};
use crate::errors::ServiceError;
use crate::handlers::error_response;
use crate::models::agents::{AgentResponse, AgentStepInput, CreateAgentRequest, UpdateAgentRequest};
use crate::models::error::ErrorResponse;
use crate::AppState;

pub async fn create_agent(
    State(state): State<AppState>,
    Json(payload): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<AgentResponse>), (StatusCode, Json<ErrorResponse>)> {
    let txn = state
        .db
        .begin()
        .await
        .map_err(|e| error_response(e.into()))?;

    let agent = agents::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(payload.user_id),
        template_id: Set(payload.template_id),
        name: Set(payload.name),
        instructions: Set(payload.instructions),
        profile_image_url: Set(payload.profile_image_url),
        ..Default::default()
    }
    .insert(&txn)
    .await
    .map_err(|e| error_response(e.into()))?;

    insert_steps(&txn, agent.id, &payload.steps)
        .await
        .map_err(error_response)?;

    txn.commit().await.map_err(|e| error_response(e.into()))?;

    tracing::info!(agent_id = %agent.id, user_id = %agent.user_id, "Created agent");

    let steps = ordered_steps(&state.db, agent.id)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::CREATED,
        Json(AgentResponse::from_parts(agent, steps)),
    ))
}

/// Partial update of the agent's fields. When `steps` is present the stored
/// step list is replaced wholesale with the payload's, in payload order.
pub async fn update_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<UpdateAgentRequest>,
) -> Result<Json<AgentResponse>, (StatusCode, Json<ErrorResponse>)> {
    let txn = state
        .db
        .begin()
        .await
        .map_err(|e| error_response(e.into()))?;

    let agent = Agents::find_by_id(agent_id)
        .filter(agents::Column::UserId.eq(payload.user_id))
        .one(&txn)
        .await
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(ServiceError::NotFound("Agent".to_string())))?;

    let mut active: agents::ActiveModel = agent.into();
    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(instructions) = payload.instructions {
        active.instructions = Set(instructions);
    }
    if let Some(template_id) = payload.template_id {
        active.template_id = Set(Some(template_id));
    }
    if let Some(url) = payload.profile_image_url {
        active.profile_image_url = Set(Some(url));
    }
    let agent = active
        .update(&txn)
        .await
        .map_err(|e| error_response(e.into()))?;

    if let Some(steps) = &payload.steps {
        AgentSteps::delete_many()
            .filter(agent_steps::Column::AgentId.eq(agent_id))
            .exec(&txn)
            .await
            .map_err(|e| error_response(e.into()))?;
        insert_steps(&txn, agent_id, steps)
            .await
            .map_err(error_response)?;
    }

    txn.commit().await.map_err(|e| error_response(e.into()))?;

    let steps = ordered_steps(&state.db, agent_id)
        .await
        .map_err(error_response)?;
    Ok(Json(AgentResponse::from_parts(agent, steps)))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<Json<AgentResponse>, (StatusCode, Json<ErrorResponse>)> {
    let agent = Agents::find_by_id(agent_id)
        .one(&state.db)
        .await
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(ServiceError::NotFound("Agent".to_string())))?;

    let steps = ordered_steps(&state.db, agent_id)
        .await
        .map_err(error_response)?;
    Ok(Json(AgentResponse::from_parts(agent, steps)))
}

/// All agents owned by the user, newest first.
pub async fn list_user_agents(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<agents::Model>>, (StatusCode, Json<ErrorResponse>)> {
    let agents = Agents::find()
        .filter(agents::Column::UserId.eq(user_id))
        .order_by(agents::Column::CreatedAt, Order::Desc)
        .all(&state.db)
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(Json(agents))
}

async fn insert_steps<C: ConnectionTrait>(
    conn: &C,
    agent_id: Uuid,
    steps: &[AgentStepInput],
) -> Result<(), ServiceError> {
    for (index, step) in steps.iter().enumerate() {
        agent_steps::ActiveModel {
            id: Set(Uuid::new_v4()),
            agent_id: Set(agent_id),
            step_index: Set(index as i32),
            instructions: Set(step.instructions.clone()),
            images: Set(step.images.clone()),
            ..Default::default()
        }
        .insert(conn)
        .await?;
    }
    Ok(())
}

async fn ordered_steps<C: ConnectionTrait>(
    conn: &C,
    agent_id: Uuid,
) -> Result<Vec<agent_steps::Model>, ServiceError> {
    let steps = AgentSteps::find()
        .filter(agent_steps::Column::AgentId.eq(agent_id))
        .order_by(agent_steps::Column::StepIndex, Order::Asc)
        .all(conn)
        .await?;
    Ok(steps)
}
