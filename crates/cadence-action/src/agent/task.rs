//! Task agent. Creates, completes and plans to-do items.

use async_trait::async_trait;
use cadence_core::{ActionRequest, AgentKind, UserAction};
use chrono::NaiveDate;
use serde_json::{json, Value};

use crate::agent::{AgentBehavior, AgentContext};
use crate::error::ActionError;
use crate::types::{AgentDescriptor, TrainingReport};

pub struct TaskAgent {
    ctx: AgentContext,
}

impl TaskAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    fn due_date(action: &ActionRequest) -> Result<Option<NaiveDate>, ActionError> {
        action
            .param_str("due")
            .map(|raw| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| ActionError::Validation(format!("due date '{}' is not YYYY-MM-DD", raw)))
            })
            .transpose()
    }
}

#[async_trait]
impl AgentBehavior for TaskAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Task
    }

    fn validate(&self, action: &ActionRequest) -> Result<(), ActionError> {
        Self::due_date(action).map(|_| ())
    }

    fn describe(&self, action: &ActionRequest) -> String {
        let title = action.param_str("title").unwrap_or("untitled task");
        format!("Task {}: {}", action.action_type, title)
    }

    async fn perform_action(
        &self,
        agent: &AgentDescriptor,
        action: &ActionRequest,
    ) -> Result<Value, ActionError> {
        let due = Self::due_date(action)?;
        let prompt = format!(
            "{}You are {}, a task assistant. For '{}', list the next concrete step:\n{}",
            self.ctx.examples_prompt(agent.id, &action.action_type),
            agent.name,
            action.action_type,
            Value::Object(action.params.clone())
        );
        let next_step = self.ctx.complete(&prompt).await?;

        Ok(json!({
            "action": action.action_type,
            "title": action.param_str("title"),
            "due": due.map(|d| d.to_string()),
            "next_step": next_step,
        }))
    }

    async fn train(
        &self,
        agent: &AgentDescriptor,
        data: &[UserAction],
    ) -> Result<TrainingReport, ActionError> {
        self.ctx.store_training_examples(agent.id, data)
    }
}
