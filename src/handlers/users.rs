use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::entities::{prelude::*, users};
use crate::handlers::error_response;
use crate::models::error::ErrorResponse;
use crate::models::users::{CreateUserRequest, UserResponse};
use crate::AppState;

/// Register (or look up) a user by email. First touch seeds the credit
/// balance with the welcome grant.
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<UserResponse>, (StatusCode, Json<ErrorResponse>)> {
    let existing = Users::find()
        .filter(users::Column::Email.eq(&payload.email))
        .one(&state.db)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Database error: {}", e),
                }),
            )
        })?;

    let user = match existing {
        Some(user) => user,
        None => users::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(payload.email.clone()),
            stripe_customer_id: Set(None),
            ..Default::default()
        }
        .insert(&state.db)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to create user: {}", e),
                }),
            )
        })?,
    };

    let credit = state
        .credits
        .ensure_user_credits(user.id)
        .await
        .map_err(error_response)?;

    Ok(Json(UserResponse {
        id: user.id,
        email: user.email,
        balance: credit.balance,
    }))
}
