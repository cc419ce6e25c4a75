//! Run orchestrator
//!
//! Owns the lifecycle of an agent run: queue -> running -> succeeded/failed,
//! with one run-step row per agent step. Steps execute strictly in
//! step_index order; a step failure is recorded on the step and never aborts
//! the run. Credits are settled against the ledger exactly once, after every
//! step has been attempted.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, Order, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::entities::agent_run_steps::{self, RunStepStatus};
use crate::entities::agent_runs::{self, RunStatus};
use crate::entities::prelude::*;
use crate::entities::{agent_steps, agents};
use crate::errors::{Result, ServiceError};
use crate::models::artifact::Artifact;
use crate::models::runs::{RunStatusResponse, RunStepStatusResponse};
use crate::services::credits::{agent_run_cost, CreditsService};
use crate::services::generation::{GenerateImageRequest, ImageGenerator};
use crate::services::intent::StepClassifier;

// Recursive reference-image extraction stops at this nesting depth.
const IMAGE_EXTRACTION_DEPTH: i32 = 3;

const RUN_LIST_LIMIT: u64 = 100;

#[derive(Clone)]
pub struct AgentRunsService {
    db: DatabaseConnection,
    credits: CreditsService,
    generator: Arc<dyn ImageGenerator>,
    classifier: Arc<dyn StepClassifier>,
}

enum StepOutcome {
    Completed {
        output: String,
        artifact: Artifact,
        cost: i32,
    },
    Skipped {
        output: String,
    },
}

impl AgentRunsService {
    pub fn new(
        db: DatabaseConnection,
        credits: CreditsService,
        generator: Arc<dyn ImageGenerator>,
        classifier: Arc<dyn StepClassifier>,
    ) -> Self {
        Self {
            db,
            credits,
            generator,
            classifier,
        }
    }

    /// Create a queued run with one pending run-step per agent step. Fails
    /// with `InsufficientCredits` before anything is written if the estimated
    /// cost exceeds the user's balance. Returns the run and the estimate; the
    /// caller hands the run id to the worker queue.
    pub async fn queue_run(
        &self,
        agent_id: Uuid,
        user_id: Uuid,
    ) -> Result<(agent_runs::Model, i32)> {
        let agent = Agents::find()
            .filter(agents::Column::Id.eq(agent_id))
            .filter(agents::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Agent".to_string()))?;

        let steps = AgentSteps::find()
            .filter(agent_steps::Column::AgentId.eq(agent_id))
            .order_by(agent_steps::Column::StepIndex, Order::Asc)
            .all(&self.db)
            .await?;

        let image_steps = steps
            .iter()
            .filter(|step| {
                self.classifier
                    .needs_image(&step.instructions, &agent.instructions, step.step_index)
            })
            .count();

        let credits_needed = agent_run_cost(steps.len(), image_steps);

        if !self
            .credits
            .check_sufficient_credits(user_id, credits_needed)
            .await?
        {
            return Err(ServiceError::InsufficientCredits {
                needed: credits_needed,
            });
        }

        let txn = self.db.begin().await?;

        let run = agent_runs::ActiveModel {
            id: Set(Uuid::new_v4()),
            agent_id: Set(agent_id),
            user_id: Set(user_id),
            status: Set(RunStatus::Queued),
            parameters: Set(Some(json!({ "estimated_credits": credits_needed }))),
            credits_used: Set(0),
            started_at: Set(None),
            finished_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        for (index, step) in steps.iter().enumerate() {
            agent_run_steps::ActiveModel {
                id: Set(Uuid::new_v4()),
                agent_run_id: Set(run.id),
                agent_step_id: Set(Some(step.id)),
                step_index: Set(index as i32),
                status: Set(RunStepStatus::Pending),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        tracing::info!(
            run_id = %run.id,
            agent_id = %agent_id,
            steps = steps.len(),
            image_steps,
            credits_needed,
            "Queued agent run"
        );

        Ok((run, credits_needed))
    }

    /// Drive a run to a terminal state. Never returns an error to the worker:
    /// orchestration faults terminalize the run as failed with zero credits
    /// charged.
    pub async fn process_run(&self, run_id: Uuid) {
        if let Err(err) = self.drive_run(run_id).await {
            tracing::error!(run_id = %run_id, error = %err, "Agent run failed");
            if let Err(update_err) = self.mark_run_failed(run_id, &err.to_string()).await {
                tracing::error!(
                    run_id = %run_id,
                    error = %update_err,
                    "Failed to record run failure"
                );
            }
        }
    }

    async fn drive_run(&self, run_id: Uuid) -> Result<()> {
        let run = AgentRuns::find_by_id(run_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Run".to_string()))?;

        let mut active: agent_runs::ActiveModel = run.clone().into();
        active.status = Set(RunStatus::Running);
        active.started_at = Set(Some(Utc::now().into()));
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;

        let run_steps = AgentRunSteps::find()
            .filter(agent_run_steps::Column::AgentRunId.eq(run_id))
            .order_by(agent_run_steps::Column::StepIndex, Order::Asc)
            .all(&self.db)
            .await?;

        let mut total_credits: i32 = 0;

        for run_step in run_steps {
            let mut active: agent_run_steps::ActiveModel = run_step.clone().into();
            active.status = Set(RunStepStatus::Running);
            active.started_at = Set(Some(Utc::now().into()));
            active.updated_at = Set(Utc::now().into());
            active.update(&self.db).await?;

            match self.execute_step(&run, &run_step).await {
                Ok(StepOutcome::Completed {
                    output,
                    artifact,
                    cost,
                }) => {
                    total_credits += cost;
                    let mut active: agent_run_steps::ActiveModel = run_step.into();
                    active.status = Set(RunStepStatus::Succeeded);
                    active.finished_at = Set(Some(Utc::now().into()));
                    active.output = Set(Some(output));
                    active.artifacts = Set(Some(serde_json::to_value(&artifact).map_err(
                        |e| ServiceError::InvalidRequest(format!("artifact encoding: {}", e)),
                    )?));
                    active.updated_at = Set(Utc::now().into());
                    active.update(&self.db).await?;
                }
                Ok(StepOutcome::Skipped { output }) => {
                    let mut active: agent_run_steps::ActiveModel = run_step.into();
                    active.status = Set(RunStepStatus::Skipped);
                    active.finished_at = Set(Some(Utc::now().into()));
                    active.output = Set(Some(output));
                    active.updated_at = Set(Utc::now().into());
                    active.update(&self.db).await?;
                }
                Err(step_err) => {
                    // Step failures stay on the step; the run keeps going.
                    tracing::warn!(
                        run_id = %run_id,
                        step_index = run_step.step_index,
                        error = %step_err,
                        "Run step failed"
                    );
                    let mut active: agent_run_steps::ActiveModel = run_step.into();
                    active.status = Set(RunStepStatus::Failed);
                    active.finished_at = Set(Some(Utc::now().into()));
                    active.error_message = Set(Some(step_err.to_string()));
                    active.output = Set(Some("Step processing failed".to_string()));
                    active.updated_at = Set(Utc::now().into());
                    active.update(&self.db).await?;
                }
            }
        }

        // Settle once, after every step was attempted.
        if total_credits > 0 {
            if let Err(err) = self
                .credits
                .deduct_credits(
                    run.user_id,
                    total_credits,
                    &format!("Agent run: {} credits used", total_credits),
                    Some(run_id.to_string()),
                    Some("agent".to_string()),
                )
                .await
            {
                // Distinct from ordinary orchestration faults: the work is
                // done but the balance was drained concurrently.
                tracing::error!(
                    run_id = %run_id,
                    credits = total_credits,
                    error = %err,
                    "Ledger settlement failed after run execution"
                );
                return Err(err);
            }
        }

        let run = AgentRuns::find_by_id(run_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Run".to_string()))?;

        let mut parameters = run.parameters.clone().unwrap_or_else(|| json!({}));
        if let Some(object) = parameters.as_object_mut() {
            object.insert("actual_credits_used".to_string(), json!(total_credits));
        }

        let mut active: agent_runs::ActiveModel = run.into();
        active.status = Set(RunStatus::Succeeded);
        active.finished_at = Set(Some(Utc::now().into()));
        active.credits_used = Set(total_credits);
        active.parameters = Set(Some(parameters));
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;

        tracing::info!(run_id = %run_id, credits_used = total_credits, "Agent run succeeded");
        Ok(())
    }

    async fn execute_step(
        &self,
        run: &agent_runs::Model,
        run_step: &agent_run_steps::Model,
    ) -> Result<StepOutcome> {
        let agent_step = match run_step.agent_step_id {
            Some(step_id) => AgentSteps::find_by_id(step_id).one(&self.db).await?,
            None => None,
        };

        let Some(agent_step) = agent_step else {
            // The step template was deleted out from under the run.
            return Ok(StepOutcome::Skipped {
                output: "Step configuration not found".to_string(),
            });
        };

        let agent = Agents::find_by_id(run.agent_id).one(&self.db).await?;
        let agent_instructions = agent
            .as_ref()
            .map(|a| a.instructions.as_str())
            .unwrap_or("");

        let needs_image = self.classifier.needs_image(
            &agent_step.instructions,
            agent_instructions,
            agent_step.step_index,
        );

        tracing::debug!(
            run_id = %run.id,
            step_index = agent_step.step_index,
            needs_image,
            "Executing step"
        );

        if needs_image {
            self.generate_image_step(agent.as_ref(), &agent_step).await
        } else {
            self.process_text_step(&agent_step).await
        }
    }

    async fn process_text_step(&self, agent_step: &agent_steps::Model) -> Result<StepOutcome> {
        // Text work is simulated with a bounded random delay for now.
        let delay_ms = {
            let mut rng = rand::thread_rng();
            rng.gen_range(1000..3000)
        };
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;

        let preview: String = agent_step.instructions.chars().take(100).collect();
        let ellipsis = if agent_step.instructions.chars().count() > 100 {
            "..."
        } else {
            ""
        };

        Ok(StepOutcome::Completed {
            output: format!("Processed: {}{}", preview, ellipsis),
            artifact: Artifact::Text {
                content: format!("Step completed: {}", agent_step.instructions),
            },
            cost: agent_run_cost(1, 0),
        })
    }

    async fn generate_image_step(
        &self,
        agent: Option<&agents::Model>,
        agent_step: &agent_steps::Model,
    ) -> Result<StepOutcome> {
        let template = match agent.and_then(|a| a.template_id) {
            Some(template_id) => Templates::find_by_id(template_id).one(&self.db).await?,
            None => None,
        };

        // Step images win over template images as the primary reference.
        let step_images = extract_image_urls(agent_step.images.as_ref(), IMAGE_EXTRACTION_DEPTH);
        let template_images = extract_image_urls(
            template.as_ref().and_then(|t| t.images.as_ref()),
            IMAGE_EXTRACTION_DEPTH,
        );

        let agent_instructions = agent.map(|a| a.instructions.as_str()).unwrap_or("");
        let template_prompt = template.as_ref().map(|t| t.prompt.as_str()).unwrap_or("");
        let has_references = !step_images.is_empty() || !template_images.is_empty();

        let prompt = build_image_prompt(
            &agent_step.instructions,
            agent_instructions,
            template_prompt,
            agent_step.step_index,
            has_references,
        );

        let reference = step_images
            .first()
            .or_else(|| template_images.first())
            .cloned();

        let request = GenerateImageRequest {
            prompt: prompt.clone(),
            image_url: reference.clone(),
            strength: reference.is_some().then_some(0.75),
            ..Default::default()
        };

        let image = self.generator.generate(request).await.map_err(|err| match err {
            ServiceError::GenerationFailed(_) => err,
            other => ServiceError::GenerationFailed(other.to_string()),
        })?;

        let output = format!(
            "Generated image successfully: {}x{}px using {}",
            image.width,
            image.height,
            if reference.is_some() {
                "reference image"
            } else {
                "text prompt only"
            }
        );

        Ok(StepOutcome::Completed {
            output,
            artifact: Artifact::Image {
                url: image.url,
                width: image.width,
                height: image.height,
                seed: image.seed,
                prompt,
                reference_image: reference,
            },
            cost: agent_run_cost(1, 1),
        })
    }

    async fn mark_run_failed(&self, run_id: Uuid, error_message: &str) -> Result<()> {
        let Some(run) = AgentRuns::find_by_id(run_id).one(&self.db).await? else {
            return Ok(());
        };

        let mut active: agent_runs::ActiveModel = run.into();
        active.status = Set(RunStatus::Failed);
        active.finished_at = Set(Some(Utc::now().into()));
        active.error_message = Set(Some(error_message.to_string()));
        // Failed runs are never charged.
        active.credits_used = Set(0);
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;
        Ok(())
    }

    /// Status projection for polling clients.
    pub async fn get_run_status(&self, run_id: Uuid) -> Result<RunStatusResponse> {
        let run = AgentRuns::find_by_id(run_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Run".to_string()))?;

        let steps = AgentRunSteps::find()
            .filter(agent_run_steps::Column::AgentRunId.eq(run_id))
            .order_by(agent_run_steps::Column::StepIndex, Order::Asc)
            .all(&self.db)
            .await?;

        Ok(RunStatusResponse {
            id: run.id,
            status: run.status,
            credits_used: run.credits_used,
            started_at: run.started_at,
            finished_at: run.finished_at,
            error_message: run.error_message,
            steps: steps
                .into_iter()
                .map(|step| RunStepStatusResponse {
                    id: step.id,
                    step_index: step.step_index,
                    status: step.status,
                    output: step.output,
                    artifacts: step.artifacts,
                    started_at: step.started_at,
                    finished_at: step.finished_at,
                    error_message: step.error_message,
                })
                .collect(),
        })
    }

    pub async fn list_user_runs(&self, user_id: Uuid) -> Result<Vec<agent_runs::Model>> {
        let runs = AgentRuns::find()
            .filter(agent_runs::Column::UserId.eq(user_id))
            .order_by(agent_runs::Column::CreatedAt, Order::Desc)
            .limit(RUN_LIST_LIMIT)
            .all(&self.db)
            .await?;
        Ok(runs)
    }

    /// Runs left queued or running by a previous process, oldest first, for
    /// re-enqueueing at startup.
    pub async fn unfinished_run_ids(&self) -> Result<Vec<Uuid>> {
        let runs = AgentRuns::find()
            .filter(
                agent_runs::Column::Status.is_in([RunStatus::Queued, RunStatus::Running]),
            )
            .order_by(agent_runs::Column::CreatedAt, Order::Asc)
            .all(&self.db)
            .await?;
        Ok(runs.into_iter().map(|run| run.id).collect())
    }
}

/// Collect http(s)/data URLs from an arbitrarily nested json bag, depth
/// bounded, first occurrence wins.
pub(crate) fn extract_image_urls(value: Option<&Value>, max_depth: i32) -> Vec<String> {
    let mut urls = Vec::new();
    if let Some(value) = value {
        visit_urls(value, max_depth, &mut urls);
    }

    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| !url.is_empty() && seen.insert(url.clone()))
        .collect()
}

fn visit_urls(value: &Value, depth: i32, urls: &mut Vec<String>) {
    if depth < 0 {
        return;
    }
    match value {
        Value::String(s) => {
            if s.starts_with("http") || s.starts_with("data:") {
                urls.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                visit_urls(item, depth - 1, urls);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(url)) = map.get("url") {
                urls.push(url.clone());
            }
            for (key, nested) in map {
                if key == "url" {
                    continue;
                }
                visit_urls(nested, depth - 1, urls);
            }
        }
        _ => {}
    }
}

/// Layer agent, template and step context into one generation prompt, with
/// slide-position guidance for slideshow-style agents.
pub(crate) fn build_image_prompt(
    step_instructions: &str,
    agent_instructions: &str,
    template_prompt: &str,
    step_index: i32,
    has_reference_images: bool,
) -> String {
    let agent_lower = agent_instructions.to_lowercase();
    let step_lower = step_instructions.to_lowercase();

    let guidance = if agent_lower.contains("slideshow") || agent_lower.contains("instagram") {
        if step_index == 0 {
            Some(
                "This is the HOOK/OPENING slide - make it eye-catching and attention-grabbing \
                 to stop scrolling.",
            )
        } else if step_lower.contains("call to action") || step_lower.contains("cta") {
            Some(
                "This is a CALL TO ACTION slide - include clear, actionable visual elements \
                 that encourage engagement.",
            )
        } else {
            Some(
                "This is a CONTENT slide - focus on clear, engaging visuals that support the \
                 message.",
            )
        }
    } else {
        None
    };

    let mut context = format!("AGENT CONTEXT: {}", agent_instructions);
    if !template_prompt.is_empty() {
        context.push_str(&format!("\nTEMPLATE CONTEXT: {}", template_prompt));
    }
    context.push_str(&format!("\nSTEP TASK: {}", step_instructions));
    if let Some(guidance) = guidance {
        context.push_str(&format!("\nSLIDE TYPE: {}", guidance));
    }

    let reference_section = if has_reference_images {
        "\nREFERENCE IMAGE INSTRUCTIONS:\n\
         - Analyze the provided reference image(s) for style, lighting, color palette, and composition\n\
         - Apply the visual style while creating content that matches the task requirements\n\
         - Maintain consistency with reference aesthetics while expressing the new concept\n\
         - If template images are provided, use them as style guides for the overall look and feel\n\
         - If step images are provided, they take priority for specific visual elements\n"
    } else {
        ""
    };

    format!(
        "You are a professional AI image generator creating high-quality visual content for \
         social media.\n\n{}\n{}\n\
         QUALITY REQUIREMENTS:\n\
         - Professional, high-resolution output optimized for social media engagement\n\
         - Vibrant but natural colors with proper contrast and visual appeal\n\
         - Clear focal points and strong composition following design principles\n\
         - Consistent branding and visual style across the slideshow\n\
         - Text-friendly composition with space for overlays if needed\n\
         - Match the visual style established by any reference images\n\n\
         FINAL INSTRUCTION: Create a visually striking image that effectively communicates the \
         step concept while maintaining consistency with the agent's purpose{}.",
        context,
        reference_section,
        if template_prompt.is_empty() {
            ""
        } else {
            " and template style"
        }
    )
}
