use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{agent_steps, agents};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStepInput {
    pub instructions: String,
    #[serde(default)]
    pub images: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    pub user_id: Uuid,
    pub name: String,
    pub instructions: String,
    #[serde(default)]
    pub template_id: Option<Uuid>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub steps: Vec<AgentStepInput>,
}

/// Partial update: absent fields are left unchanged. `steps`, when present,
/// replaces the whole ordered step list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAgentRequest {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub instructions: Option<String>,
    pub template_id: Option<Uuid>,
    pub profile_image_url: Option<String>,
    pub steps: Option<Vec<AgentStepInput>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStepResponse {
    pub id: Uuid,
    pub step_index: i32,
    pub instructions: String,
    pub images: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub template_id: Option<Uuid>,
    pub name: String,
    pub instructions: String,
    pub profile_image_url: Option<String>,
    pub steps: Vec<AgentStepResponse>,
}

impl AgentResponse {
    pub fn from_parts(agent: agents::Model, steps: Vec<agent_steps::Model>) -> Self {
        Self {
            id: agent.id,
            user_id: agent.user_id,
            template_id: agent.template_id,
            name: agent.name,
            instructions: agent.instructions,
            profile_image_url: agent.profile_image_url,
            steps: steps
                .into_iter()
                .map(|step| AgentStepResponse {
                    id: step.id,
                    step_index: step.step_index,
                    instructions: step.instructions,
                    images: step.images,
                })
                .collect(),
        }
    }
}
