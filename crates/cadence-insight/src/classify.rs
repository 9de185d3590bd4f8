//! Regex-based classification of action types.
//!
//! Maps free-form action type identifiers (`archive_email`, `rsvp_invite`,
//! `label_document`) to the agent kind that should own them, and flags
//! actions that carry user feedback worth training on.

use cadence_core::AgentKind;
use regex::Regex;

use crate::types::PatternType;

/// A compiled category rule.
struct CategoryRule {
    regex: Regex,
    kind: AgentKind,
}

/// Classifier for action types, compiled once and reused.
pub struct ActionClassifier {
    rules: Vec<CategoryRule>,
    learning: Regex,
}

impl Default for ActionClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionClassifier {
    pub fn new() -> Self {
        // First match wins, so the more specific domains come first.
        let table: [(&str, AgentKind); 4] = [
            (
                r"(?i)(e-?mail|inbox|reply|forward|newsletter|unsubscribe|mailbox)",
                AgentKind::Email,
            ),
            (
                r"(?i)(calendar|meeting|event|schedule|invite|rsvp|appointment)",
                AgentKind::Calendar,
            ),
            (
                r"(?i)(task|todo|to_do|checklist|reminder|deadline)",
                AgentKind::Task,
            ),
            (
                r"(?i)(doc|file|note|pdf|summar|report|draft)",
                AgentKind::Document,
            ),
        ];

        let rules = table
            .iter()
            .map(|(pat, kind)| CategoryRule {
                regex: Regex::new(pat).expect("Invalid category regex"),
                kind: *kind,
            })
            .collect();

        Self {
            rules,
            learning: Regex::new(r"(?i)(label|classif|feedback|correct|train|rate_|tag_)")
                .expect("Invalid learning regex"),
        }
    }

    /// Agent kind that should own an action type. Falls back to `Workflow`.
    pub fn category(&self, action_type: &str) -> AgentKind {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(action_type))
            .map(|rule| rule.kind)
            .unwrap_or(AgentKind::Workflow)
    }

    pub fn pattern_type(&self, action_type: &str) -> PatternType {
        if self.learning.is_match(action_type) {
            PatternType::Learning
        } else {
            PatternType::Repetitive
        }
    }
}
