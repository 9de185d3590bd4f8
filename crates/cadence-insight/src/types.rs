use cadence_core::{AgentKind, Timestamp, UserAction};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Minutes a user is assumed to spend on one manual occurrence of an action.
pub const MINUTES_SAVED_PER_OCCURRENCE: u32 = 2;

/// How a pattern should be turned into an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// The same action repeated across users; automate it directly.
    Repetitive,
    /// Labelling/feedback actions; the agent is trained on the captured window.
    Learning,
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternType::Repetitive => write!(f, "repetitive"),
            PatternType::Learning => write!(f, "learning"),
        }
    }
}

/// A recurring cluster of similar user actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPattern {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub pattern_type: PatternType,
    /// Agent kind this pattern maps to.
    pub category: AgentKind,
    /// Most recent matching actions, oldest first.
    pub actions: Vec<UserAction>,
    pub frequency: u32,
    /// In `[0, 1]`. Seeded on creation, never derived from `frequency`.
    pub confidence: f64,
    pub capabilities: Vec<String>,
    pub triggers: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl WorkflowPattern {
    /// Whether an action of this type belongs to the pattern.
    pub fn matches(&self, action_type: &str) -> bool {
        self.triggers.iter().any(|t| t == action_type)
    }

    /// Distinct action types in the retained window, in first-seen order.
    pub fn distinct_action_types(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for action in &self.actions {
            if !seen.contains(&action.action_type) {
                seen.push(action.action_type.clone());
            }
        }
        seen
    }

    /// Append an action and keep only the `window` most recent.
    pub(crate) fn push_action(&mut self, action: UserAction, window: usize) {
        self.actions.push(action);
        if self.actions.len() > window {
            let excess = self.actions.len() - window;
            self.actions.drain(..excess);
        }
    }
}

/// An automation candidate derived from a pattern. Not stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSuggestion {
    pub pattern_id: Uuid,
    pub description: String,
    pub confidence: f64,
    pub potential_benefits: Vec<String>,
    pub estimated_time_saved_minutes: u32,
}

impl AgentSuggestion {
    /// Project a pattern into a suggestion if it crosses both thresholds.
    ///
    /// Emitted iff `frequency >= min_frequency` and `confidence > min_confidence`.
    pub fn from_pattern(
        pattern: &WorkflowPattern,
        min_frequency: u32,
        min_confidence: f64,
    ) -> Option<Self> {
        if pattern.frequency < min_frequency || pattern.confidence <= min_confidence {
            return None;
        }

        let mut potential_benefits = vec![format!(
            "Handles '{}' automatically instead of by hand",
            pattern.triggers.join(", ")
        )];
        potential_benefits.push(match pattern.category {
            AgentKind::Email => "Keeps the inbox triaged without manual sorting".to_string(),
            AgentKind::Calendar => "Resolves scheduling chores before they pile up".to_string(),
            AgentKind::Document => "Produces consistent document summaries".to_string(),
            AgentKind::Task => "Keeps task lists current".to_string(),
            AgentKind::Workflow => "Chains repeated steps into one run".to_string(),
        });
        if pattern.pattern_type == PatternType::Learning {
            potential_benefits.push("Learns from your past corrections".to_string());
        }

        Some(Self {
            pattern_id: pattern.id,
            description: format!(
                "Create a {} agent for '{}' (seen {} times)",
                pattern.category,
                pattern.triggers.join(", "),
                pattern.frequency
            ),
            confidence: pattern.confidence,
            potential_benefits,
            estimated_time_saved_minutes: pattern
                .frequency
                .saturating_mul(MINUTES_SAVED_PER_OCCURRENCE),
        })
    }
}
