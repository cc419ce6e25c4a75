use axum::http::StatusCode;
use axum::Json;

use crate::errors::ServiceError;
use crate::models::error::ErrorResponse;

pub mod agents;
pub mod billing;
pub mod credits;
pub mod runs;
pub mod users;

/// Map a service error onto the `(status, body)` pair handlers return.
pub fn error_response(err: ServiceError) -> (StatusCode, Json<ErrorResponse>) {
    let status = err.status_code();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "Request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}
