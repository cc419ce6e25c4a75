use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::entities::credit_transactions::{self, TransactionKind};
use crate::handlers::error_response;
use crate::models::credits::{BalanceResponse, GrantCreditsRequest, HistoryQuery};
use crate::models::error::ErrorResponse;
use crate::AppState;

const DEFAULT_HISTORY_LIMIT: u64 = 50;

pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let credit = state
        .credits
        .get_user_credits(user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(credit.into()))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<credit_transactions::Model>>, (StatusCode, Json<ErrorResponse>)> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let entries = state
        .credits
        .transaction_history(user_id, limit)
        .await
        .map_err(error_response)?;
    Ok(Json(entries))
}

/// Admin adjustment: credit an arbitrary amount with an explicit kind.
pub async fn grant_credits(
    State(state): State<AppState>,
    Json(payload): Json<GrantCreditsRequest>,
) -> Result<Json<BalanceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let kind = payload.kind.unwrap_or(TransactionKind::Adjustment);
    state
        .credits
        .ensure_user_credits(payload.user_id)
        .await
        .map_err(error_response)?;
    let credit = state
        .credits
        .add_credits(payload.user_id, payload.amount, &payload.description, kind)
        .await
        .map_err(error_response)?;
    Ok(Json(credit.into()))
}
