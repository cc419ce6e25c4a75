//! Service-level error taxonomy shared by the ledger, orchestrator and
//! billing reconciler.

use axum::http::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Raised before a run is created; also raised if settlement finds the
    /// balance drained in the meantime.
    #[error("Insufficient credits. Need {needed} credits to run this agent.")]
    InsufficientCredits { needed: i32 },

    #[error("{0} not found")]
    NotFound(String),

    /// Webhook payloads that do not verify are rejected before any state
    /// change.
    #[error("Stripe webhook signature verification failed: {0}")]
    SignatureInvalid(String),

    /// Step-scoped: recorded on the run step, never escalated to the run.
    #[error("Image generation failed: {0}")]
    GenerationFailed(String),

    #[error("{0}")]
    InvalidRequest(String),

    /// The worker queue is full or shut down; the run stays queued in the
    /// database and is resumed on restart.
    #[error("Run queue unavailable")]
    QueueUnavailable,

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InsufficientCredits { .. } => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::SignatureInvalid(_) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::GenerationFailed(_)
            | ServiceError::QueueUnavailable
            | ServiceError::Database(_)
            | ServiceError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
