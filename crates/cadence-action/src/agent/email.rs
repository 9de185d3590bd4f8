//! Email agent.
//!
//! Triages, labels and drafts replies to messages. Outgoing actions must
//! name a plausible recipient.

use async_trait::async_trait;
use cadence_core::{ActionRequest, AgentKind, UserAction};
use serde_json::{json, Value};

use crate::agent::{AgentBehavior, AgentContext};
use crate::error::ActionError;
use crate::types::{AgentDescriptor, TrainingReport};

pub struct EmailAgent {
    ctx: AgentContext,
}

impl EmailAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    fn is_outgoing(action_type: &str) -> bool {
        ["send", "reply", "forward", "draft"]
            .iter()
            .any(|k| action_type.contains(k))
    }
}

#[async_trait]
impl AgentBehavior for EmailAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Email
    }

    fn validate(&self, action: &ActionRequest) -> Result<(), ActionError> {
        if let Some(to) = action.param_str("to") {
            if !to.contains('@') {
                return Err(ActionError::Validation(format!(
                    "recipient '{}' is not an email address",
                    to
                )));
            }
        }
        Ok(())
    }

    fn describe(&self, action: &ActionRequest) -> String {
        match action.param_str("subject") {
            Some(subject) => format!("Email {}: {}", action.action_type, subject),
            None => format!("Email {}", action.action_type),
        }
    }

    async fn perform_action(
        &self,
        agent: &AgentDescriptor,
        action: &ActionRequest,
    ) -> Result<Value, ActionError> {
        let examples = self.ctx.examples_prompt(agent.id, &action.action_type);
        let message = Value::Object(action.params.clone());

        if Self::is_outgoing(&action.action_type) {
            let prompt = format!(
                "{}You are {}, an email assistant. Write the body for '{}' given:\n{}",
                examples, agent.name, action.action_type, message
            );
            let draft = self.ctx.complete(&prompt).await?;
            tracing::debug!(agent_id = %agent.id, chars = draft.len(), "Email drafted");
            return Ok(json!({
                "action": action.action_type,
                "to": action.param_str("to"),
                "draft": draft,
            }));
        }

        let prompt = format!(
            "{}You are {}, an email assistant. Apply '{}' to this message and name the label or folder used:\n{}",
            examples, agent.name, action.action_type, message
        );
        let result = self.ctx.complete(&prompt).await?;
        Ok(json!({
            "action": action.action_type,
            "message_id": action.params.get("message_id"),
            "result": result,
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
