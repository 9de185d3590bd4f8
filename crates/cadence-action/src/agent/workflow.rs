//! Workflow agent.
//!
//! Runs a list of steps in order, one completion per step. Stops at the
//! first failing step.

use async_trait::async_trait;
use cadence_core::{ActionRequest, AgentKind, UserAction};
use serde_json::{json, Value};

use crate::agent::{AgentBehavior, AgentContext};
use crate::error::ActionError;
use crate::types::{AgentDescriptor, TrainingReport};

/// Upper bound on steps in one request.
const MAX_STEPS: usize = 20;

pub struct WorkflowAgent {
    ctx: AgentContext,
}

impl WorkflowAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    fn steps(action: &ActionRequest) -> Vec<String> {
        match action.params.get("steps").and_then(|v| v.as_array()) {
            Some(steps) => steps
                .iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect(),
            None => vec![action.action_type.clone()],
        }
    }
}

#[async_trait]
impl AgentBehavior for WorkflowAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Workflow
    }

    fn validate(&self, action: &ActionRequest) -> Result<(), ActionError> {
        let steps = Self::steps(action);
        if steps.is_empty() {
            return Err(ActionError::Validation("workflow has no steps".to_string()));
        }
        if steps.len() > MAX_STEPS {
            return Err(ActionError::Validation(format!(
                "workflow has {} steps, at most {} allowed",
                steps.len(),
                MAX_STEPS
            )));
        }
        Ok(())
    }

    async fn perform_action(
        &self,
        agent: &AgentDescriptor,
        action: &ActionRequest,
    ) -> Result<Value, ActionError> {
        let examples = self.ctx.examples_prompt(agent.id, &action.action_type);
        let mut outputs = Vec::new();

        for (i, step) in Self::steps(action).iter().enumerate() {
            let prompt = format!(
                "{}You are {}, a workflow assistant. Step {} of '{}': {}",
                examples,
                agent.name,
                i + 1,
                action.action_type,
                step
            );
            let output = self.ctx.complete(&prompt).await?;
            tracing::debug!(agent_id = %agent.id, step = %step, "Workflow step done");
            outputs.push(json!({ "step": step, "output": output }));
        }

        Ok(json!({ "action": action.action_type, "steps": outputs }))
    }

    async fn train(
        &self,
        agent: &AgentDescriptor,
        data: &[UserAction],
    ) -> Result<TrainingReport, ActionError> {
        self.ctx.store_training_examples(agent.id, data)
    }
}
