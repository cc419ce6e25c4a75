use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::entities::subscriptions;
use crate::errors::ServiceError;
use crate::handlers::error_response;
use crate::models::billing::{CheckoutResponse, CreditsCheckoutRequest, SubscriptionCheckoutRequest};
use crate::models::error::ErrorResponse;
use crate::AppState;

pub async fn create_credits_checkout(
    State(state): State<AppState>,
    Json(payload): Json<CreditsCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, (StatusCode, Json<ErrorResponse>)> {
    let session_url = state
        .billing
        .create_credits_checkout(payload.user_id, &payload.product_id)
        .await
        .map_err(error_response)?;
    Ok(Json(CheckoutResponse { session_url }))
}

pub async fn create_subscription_checkout(
    State(state): State<AppState>,
    Json(payload): Json<SubscriptionCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, (StatusCode, Json<ErrorResponse>)> {
    let session_url = state
        .billing
        .create_subscription_checkout(payload.user_id, &payload.price_id)
        .await
        .map_err(error_response)?;
    Ok(Json(CheckoutResponse { session_url }))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<subscriptions::Model>>, (StatusCode, Json<ErrorResponse>)> {
    let rows = state
        .billing
        .user_subscriptions(user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(rows))
}

/// Stripe webhook sink. The raw body is needed for signature verification, so
/// the payload is taken as bytes rather than json.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            error_response(ServiceError::SignatureInvalid(
                "missing Stripe-Signature header".to_string(),
            ))
        })?;

    state
        .billing
        .handle_webhook(&body, signature)
        .await
        .map_err(error_response)?;

    Ok(StatusCode::OK)
}
