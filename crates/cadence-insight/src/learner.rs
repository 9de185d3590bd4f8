//! Workflow pattern learning over the user action stream.
//!
//! Two clustering paths share one pattern set:
//! - `record_action` looks only at the newest action (cheap, runs per event)
//! - `analyze_patterns` regroups the whole history by action type
//!
//! Two actions are similar when they share a type and come from different
//! users, so one user's repetition cannot create a pattern on its own. Once
//! a pattern exists, live or restored, every action of its type reinforces it.

use std::collections::HashMap;

use cadence_core::config::LearnerConfig;
use cadence_core::store::{load_json, save_json};
use cadence_core::{KeyValueStore, Timestamp, UserAction};
use uuid::Uuid;

use crate::classify::ActionClassifier;
use crate::error::InsightError;
use crate::types::{AgentSuggestion, WorkflowPattern};

/// Storage key for the persisted pattern set.
pub const PATTERNS_KEY: &str = "cadence.patterns";

/// Storage key for the persisted action history.
pub const HISTORY_KEY: &str = "cadence.history";

/// What a clustering pass did to the pattern set.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternUpdate {
    Created(WorkflowPattern),
    Reinforced(WorkflowPattern),
}

impl PatternUpdate {
    pub fn pattern(&self) -> &WorkflowPattern {
        match self {
            PatternUpdate::Created(p) | PatternUpdate::Reinforced(p) => p,
        }
    }
}

/// Turns a raw action stream into a small set of confident automation candidates.
pub struct PatternLearner {
    config: LearnerConfig,
    classifier: ActionClassifier,
    history: Vec<UserAction>,
    patterns: Vec<WorkflowPattern>,
}

impl Default for PatternLearner {
    fn default() -> Self {
        Self::new(LearnerConfig::default())
    }
}

impl PatternLearner {
    pub fn new(config: LearnerConfig) -> Self {
        Self {
            config,
            classifier: ActionClassifier::new(),
            history: Vec::new(),
            patterns: Vec::new(),
        }
    }

    /// Append an action to the history and cluster it incrementally.
    ///
    /// Actions with an empty type are ignored.
    pub fn record_action(&mut self, action: UserAction) -> Option<PatternUpdate> {
        if action.action_type.trim().is_empty() {
            tracing::debug!("Ignoring user action with empty type");
            return None;
        }
        self.history.push(action);
        self.cluster_latest()
    }

    fn cluster_latest(&mut self) -> Option<PatternUpdate> {
        let (latest, earlier) = self.history.split_last()?;
        let window = self.config.action_window;

        if let Some(pattern) = self
            .patterns
            .iter_mut()
            .find(|p| p.matches(&latest.action_type))
        {
            pattern.frequency = pattern.frequency.saturating_add(1);
            pattern.push_action(latest.clone(), window);
            pattern.updated_at = Timestamp::now();
            tracing::debug!(
                pattern_id = %pattern.id,
                frequency = pattern.frequency,
                "Pattern reinforced"
            );
            return Some(PatternUpdate::Reinforced(pattern.clone()));
        }

        let similar: Vec<&UserAction> = earlier
            .iter()
            .filter(|a| a.action_type == latest.action_type && a.user_id != latest.user_id)
            .collect();

        if similar.len() < self.config.min_similar_actions {
            return None;
        }

        let mut members: Vec<UserAction> = similar.into_iter().cloned().collect();
        members.push(latest.clone());
        let pattern = self.new_pattern(&latest.action_type, members);
        tracing::info!(
            pattern_id = %pattern.id,
            action_type = %latest.action_type,
            frequency = pattern.frequency,
            "Workflow pattern detected"
        );
        self.patterns.push(pattern.clone());
        Some(PatternUpdate::Created(pattern))
    }

    /// Recluster the entire history, grouping by action type.
    ///
    /// Groups with at least `analyze_min_group` members create or update a
    /// pattern. Running it twice over the same history changes nothing.
    pub fn analyze_patterns(&mut self) -> Vec<PatternUpdate> {
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<&UserAction>> = HashMap::new();
        for action in &self.history {
            let key = action.action_type.as_str();
            if !groups.contains_key(key) {
                order.push(key);
            }
            groups.entry(key).or_default().push(action);
        }

        let window = self.config.action_window;
        let mut updates = Vec::new();
        let mut created = Vec::new();

        for action_type in order {
            let group = &groups[action_type];
            if group.len() < self.config.analyze_min_group {
                continue;
            }
            let recent: Vec<UserAction> = group
                .iter()
                .skip(group.len().saturating_sub(window))
                .map(|a| (*a).clone())
                .collect();
            let group_size = u32::try_from(group.len()).unwrap_or(u32::MAX);

            match self.patterns.iter_mut().find(|p| p.matches(action_type)) {
                Some(pattern) => {
                    let frequency = pattern.frequency.max(group_size);
                    if frequency != pattern.frequency || pattern.actions != recent {
                        pattern.frequency = frequency;
                        pattern.actions = recent;
                        pattern.updated_at = Timestamp::now();
                        updates.push(PatternUpdate::Reinforced(pattern.clone()));
                    }
                }
                None => {
                    let pattern = self.new_pattern(action_type, group.iter().map(|a| (*a).clone()).collect());
                    created.push(pattern);
                }
            }
        }

        for pattern in created {
            tracing::info!(
                pattern_id = %pattern.id,
                frequency = pattern.frequency,
                "Workflow pattern detected by full analysis"
            );
            self.patterns.push(pattern.clone());
            updates.push(PatternUpdate::Created(pattern));
        }

        tracing::debug!(
            history = self.history.len(),
            patterns = self.patterns.len(),
            changed = updates.len(),
            "Pattern analysis complete"
        );
        updates
    }

    fn new_pattern(&self, action_type: &str, members: Vec<UserAction>) -> WorkflowPattern {
        let category = self.classifier.category(action_type);
        let pattern_type = self.classifier.pattern_type(action_type);
        let frequency = u32::try_from(members.len()).unwrap_or(u32::MAX);
        let distinct_users = {
            let mut users: Vec<&str> = members.iter().map(|a| a.user_id.as_str()).collect();
            users.sort_unstable();
            users.dedup();
            users.len()
        };
        let skip = members.len().saturating_sub(self.config.action_window);
        let now = Timestamp::now();

        WorkflowPattern {
            id: Uuid::new_v4(),
            name: format!("Recurring {}", action_type),
            description: format!(
                "'{}' performed {} times by {} users",
                action_type, frequency, distinct_users
            ),
            pattern_type,
            category,
            actions: members.into_iter().skip(skip).collect(),
            frequency,
            confidence: self.config.seed_confidence,
            capabilities: vec![action_type.to_string()],
            triggers: vec![action_type.to_string()],
            created_at: now,
            updated_at: now,
        }
    }

    /// Project the current patterns into automation suggestions.
    ///
    /// Pure and deterministic: identical pattern sets yield identical output.
    pub fn suggest_automations(&self) -> Vec<AgentSuggestion> {
        self.patterns
            .iter()
            .filter_map(|p| {
                AgentSuggestion::from_pattern(
                    p,
                    self.config.suggest_min_frequency,
                    self.config.suggest_min_confidence,
                )
            })
            .collect()
    }

    pub fn patterns(&self) -> &[WorkflowPattern] {
        &self.patterns
    }

    pub fn pattern(&self, id: Uuid) -> Option<&WorkflowPattern> {
        self.patterns.iter().find(|p| p.id == id)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Forget all history and patterns.
    pub fn reset(&mut self) {
        self.history.clear();
        self.patterns.clear();
    }

    /// Merge previously learned patterns, replacing any with the same trigger.
    pub fn restore(&mut self, patterns: Vec<WorkflowPattern>) {
        for restored in patterns {
            self.patterns
                .retain(|p| !restored.triggers.iter().any(|t| p.matches(t)));
            self.patterns.push(restored);
        }
    }

    /// Persist the pattern set and the most recent `history_limit` actions.
    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), InsightError> {
        let skip = self.history.len().saturating_sub(self.config.history_limit);
        let recent = &self.history[skip..];
        save_json(store, HISTORY_KEY, &recent)?;
        save_json(store, PATTERNS_KEY, &self.patterns)?;
        Ok(())
    }

    /// Restore the persisted history and pattern set.
    ///
    /// Loaded actions go ahead of anything recorded since start-up, so a
    /// following [`PatternLearner::analyze_patterns`] sees the whole stream.
    /// Actions already in memory are not loaded twice.
    /// Returns how many patterns were loaded.
    pub fn load(&mut self, store: &dyn KeyValueStore) -> Result<usize, InsightError> {
        let mut history: Vec<UserAction> = load_json(store, HISTORY_KEY)?.unwrap_or_default();
        history.retain(|a| !self.history.contains(a));
        if !history.is_empty() {
            tracing::debug!(actions = history.len(), "Action history loaded");
            history.append(&mut self.history);
            self.history = history;
        }

        let patterns: Vec<WorkflowPattern> = load_json(store, PATTERNS_KEY)?.unwrap_or_default();
        let count = patterns.len();
        self.restore(patterns);
        Ok(count)
    }
}
