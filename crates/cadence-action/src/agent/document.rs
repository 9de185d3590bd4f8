//! Document agent: summaries, drafts and exports of text content.

use async_trait::async_trait;
use cadence_core::{ActionRequest, AgentKind, UserAction};
use serde_json::{json, Value};

use crate::agent::{AgentBehavior, AgentContext};
use crate::error::ActionError;
use crate::types::{AgentDescriptor, TrainingReport};

/// Content longer than this is truncated before prompting.
const MAX_CONTENT_CHARS: usize = 8_000;

pub struct DocumentAgent {
    ctx: AgentContext,
}

impl DocumentAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl AgentBehavior for DocumentAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Document
    }

    fn validate(&self, action: &ActionRequest) -> Result<(), ActionError> {
        if action.param_str("content").is_none() && action.param_str("document_id").is_none() {
            return Err(ActionError::Validation(
                "document actions need 'content' or 'document_id'".to_string(),
            ));
        }
        Ok(())
    }

    fn describe(&self, action: &ActionRequest) -> String {
        let target = action.param_str("document_id").unwrap_or("inline content");
        format!("Document {}: {}", action.action_type, target)
    }

    async fn perform_action(
        &self,
        agent: &AgentDescriptor,
        action: &ActionRequest,
    ) -> Result<Value, ActionError> {
        let content = action.param_str("content").unwrap_or_default();
        let word_count = content.split_whitespace().count();
        let excerpt: String = content.chars().take(MAX_CONTENT_CHARS).collect();

        let prompt = format!(
            "{}You are {}, a document assistant. Perform '{}' on the following text:\n{}",
            self.ctx.examples_prompt(agent.id, &action.action_type),
            agent.name,
            action.action_type,
            excerpt
        );
        let output = self.ctx.complete(&prompt).await?;

        Ok(json!({
            "action": action.action_type,
            "document_id": action.param_str("document_id"),
            "word_count": word_count,
            "output": output,
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
