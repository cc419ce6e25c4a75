use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::agent_run_steps::RunStepStatus;
use crate::entities::agent_runs::{self, RunStatus};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAgentRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueuedResponse {
    pub id: Uuid,
    pub status: RunStatus,
    pub estimated_credits: i32,
}

impl RunQueuedResponse {
    pub fn from_run(run: &agent_runs::Model, estimated_credits: i32) -> Self {
        Self {
            id: run.id,
            status: run.status.clone(),
            estimated_credits,
        }
    }
}

/// Read-only projection returned by run status polling.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusResponse {
    pub id: Uuid,
    pub status: RunStatus,
    pub credits_used: i32,
    pub started_at: Option<DateTime<FixedOffset>>,
    pub finished_at: Option<DateTime<FixedOffset>>,
    pub error_message: Option<String>,
    pub steps: Vec<RunStepStatusResponse>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStepStatusResponse {
    pub id: Uuid,
    pub step_index: i32,
    pub status: RunStepStatus,
    pub output: Option<String>,
    pub artifacts: Option<serde_json::Value>,
    pub started_at: Option<DateTime<FixedOffset>>,
    pub finished_at: Option<DateTime<FixedOffset>>,
    pub error_message: Option<String>,
}
