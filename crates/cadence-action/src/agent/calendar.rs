//! Calendar agent. Handles invites, scheduling and reschedules.

use async_trait::async_trait;
use cadence_core::{ActionRequest, AgentKind, UserAction};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::agent::{AgentBehavior, AgentContext};
use crate::error::ActionError;
use crate::types::{AgentDescriptor, TrainingReport};

pub struct CalendarAgent {
    ctx: AgentContext,
}

impl CalendarAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    fn parse_time(action: &ActionRequest, key: &str) -> Result<Option<DateTime<Utc>>, ActionError> {
        match action.param_str(key) {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| ActionError::Validation(format!("{} '{}': {}", key, raw, e))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AgentBehavior for CalendarAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Calendar
    }

    fn validate(&self, action: &ActionRequest) -> Result<(), ActionError> {
        let start = Self::parse_time(action, "start")?;
        let end = Self::parse_time(action, "end")?;
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Err(ActionError::Validation(
                    "event must end after it starts".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn describe(&self, action: &ActionRequest) -> String {
        let title = action.param_str("title").unwrap_or("untitled event");
        format!("Calendar {}: {}", action.action_type, title)
    }

    async fn perform_action(
        &self,
        agent: &AgentDescriptor,
        action: &ActionRequest,
    ) -> Result<Value, ActionError> {
        let start = Self::parse_time(action, "start")?;
        let end = Self::parse_time(action, "end")?;
        let prompt = format!(
            "{}You are {}, a calendar assistant. Carry out '{}' and reply with a one-line confirmation:\n{}",
            self.ctx.examples_prompt(agent.id, &action.action_type),
            agent.name,
            action.action_type,
            Value::Object(action.params.clone())
        );
        let confirmation = self.ctx.complete(&prompt).await?;

        Ok(json!({
            "action": action.action_type,
            "title": action.param_str("title"),
            "start": start.map(|t| t.to_rfc3339()),
            "duration_minutes": start.zip(end).map(|(s, e)| (e - s).num_minutes()),
            "confirmation": confirmation,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{context, descriptor};
    use crate::provider::StaticProvider;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_schedule_meeting() {
        let agent = CalendarAgent::new(context(Arc::new(StaticProvider::new("Booked"))));
        let d = descriptor(AgentKind::Calendar, &["schedule_meeting"]);
        let action = ActionRequest::from_json(
            "schedule_meeting",
            json!({
                "title": "Design review",
                "start": "2026-03-02T10:00:00Z",
                "end": "2026-03-02T10:45:00Z"
            }),
        );
        assert!(agent.validate(&action).is_ok());

        let data = agent.perform_action(&d, &action).await.unwrap();
        assert_eq!(data["duration_minutes"], 45);
        assert_eq!(data["confirmation"], "Booked");
    }

    #[test]
    fn test_rejects_bad_times() {
        let agent = CalendarAgent::new(context(Arc::new(StaticProvider::default())));
        let garbled = ActionRequest::from_json("schedule_meeting", json!({"start": "tomorrow-ish"}));
        assert!(matches!(agent.validate(&garbled), Err(ActionError::Validation(_))));

        let backwards = ActionRequest::from_json(
            "schedule_meeting",
            json!({"start": "2026-03-02T11:00:00Z", "end": "2026-03-02T10:00:00Z"}),
        );
        assert!(agent.validate(&backwards).is_err());
    }
}
