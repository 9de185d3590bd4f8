use std::collections::BTreeSet;
use std::fmt;

use cadence_core::{ActionRequest, AgentKind, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ActionError;

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle status of a registered agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Training,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Inactive => write!(f, "inactive"),
            AgentStatus::Training => write!(f, "training"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "inactive" => Ok(AgentStatus::Inactive),
            "training" => Ok(AgentStatus::Training),
            _ => Err(format!("Unknown agent status: {}", s)),
        }
    }
}

/// How much an agent may do without a human in the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Acts on its own, results reviewed afterwards.
    Supervised,
    /// Acts on its own, no review expected.
    Autonomous,
    /// Only acts when explicitly asked.
    Manual,
}

impl fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutonomyLevel::Supervised => write!(f, "supervised"),
            AutonomyLevel::Autonomous => write!(f, "autonomous"),
            AutonomyLevel::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for AutonomyLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supervised" => Ok(AutonomyLevel::Supervised),
            "autonomous" => Ok(AutonomyLevel::Autonomous),
            "manual" => Ok(AutonomyLevel::Manual),
            _ => Err(format!("Unknown autonomy level: {}", s)),
        }
    }
}

/// Approval state of an audit entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    AutoApproved,
    Approved,
    Rejected,
}

impl AuditStatus {
    /// Whether the action was allowed to run.
    pub fn is_approved(&self) -> bool {
        matches!(self, AuditStatus::AutoApproved | AuditStatus::Approved)
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditStatus::Pending => write!(f, "pending"),
            AuditStatus::AutoApproved => write!(f, "auto_approved"),
            AuditStatus::Approved => write!(f, "approved"),
            AuditStatus::Rejected => write!(f, "rejected"),
        }
    }
}

// =============================================================================
// Agent Descriptors
// =============================================================================

/// Registry record for one agent. Owned by the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Action types this agent may perform.
    pub capabilities: BTreeSet<String>,
    pub kind: AgentKind,
    /// Bumped on every configuration update.
    pub version: u32,
    pub status: AgentStatus,
    pub autonomy_level: AutonomyLevel,
    /// Defer every action to external confirmation.
    pub require_confirmation: bool,
    pub created_at: Timestamp,
    pub last_modified_at: Timestamp,
    #[serde(default)]
    pub preferences: Map<String, Value>,
}

impl AgentDescriptor {
    pub fn has_capability(&self, action_type: &str) -> bool {
        self.capabilities.contains(action_type)
    }

    /// Apply a partial update, bumping the version when anything changed.
    pub fn apply(&mut self, update: AgentConfigUpdate) -> bool {
        let before = self.clone();
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(capabilities) = update.capabilities {
            self.capabilities = capabilities.into_iter().collect();
        }
        if let Some(level) = update.autonomy_level {
            self.autonomy_level = level;
        }
        if let Some(require) = update.require_confirmation {
            self.require_confirmation = require;
        }
        if let Some(preferences) = update.preferences {
            self.preferences.extend(preferences);
        }

        let changed = *self != before;
        if changed {
            self.version = self.version.saturating_add(1);
            self.last_modified_at = Timestamp::now();
        }
        changed
    }
}

/// Everything needed to register a new agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: AgentKind,
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autonomy_level: Option<AutonomyLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_confirmation: Option<bool>,
    #[serde(default)]
    pub preferences: Map<String, Value>,
}

impl AgentSpec {
    pub fn new<I, S>(name: impl Into<String>, kind: AgentKind, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            autonomy_level: None,
            require_confirmation: None,
            preferences: Map::new(),
        }
    }

    pub fn with_confirmation(mut self, require: bool) -> Self {
        self.require_confirmation = Some(require);
        self
    }
}

/// Partial configuration update. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfigUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub autonomy_level: Option<AutonomyLevel>,
    pub require_confirmation: Option<bool>,
    /// Merged into the existing preferences.
    pub preferences: Option<Map<String, Value>>,
}

// =============================================================================
// Results & Metrics
// =============================================================================

/// Outcome of one executed, rejected or deferred [`ActionRequest`].
///
/// A deferred result has `success = false`, no `error`, and carries
/// `pending_audit_id`. Every other result that reached the ledger carries
/// `audit_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub action: ActionRequest,
    pub timestamp: Timestamp,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_audit_id: Option<Uuid>,
    /// Whether resubmitting the same request may succeed.
    #[serde(default)]
    pub retryable: bool,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ActionResult {
    pub fn succeeded(action: ActionRequest, data: Value, audit_id: Uuid, duration_ms: u64) -> Self {
        let message = format!("'{}' completed", action.action_type);
        Self {
            success: true,
            data: Some(data),
            error: None,
            action,
            timestamp: Timestamp::now(),
            message,
            audit_id: Some(audit_id),
            pending_audit_id: None,
            retryable: false,
            duration_ms,
        }
    }

    pub fn failed(
        action: ActionRequest,
        error: &ActionError,
        audit_id: Option<Uuid>,
        duration_ms: u64,
    ) -> Self {
        let message = format!("'{}' failed: {}", action.action_type, error.user_message());
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            action,
            timestamp: Timestamp::now(),
            message,
            audit_id,
            pending_audit_id: None,
            retryable: error.is_retryable(),
            duration_ms,
        }
    }

    pub fn deferred(action: ActionRequest, pending_audit_id: Uuid) -> Self {
        let message = format!("'{}' is waiting for confirmation", action.action_type);
        Self {
            success: false,
            data: None,
            error: None,
            action,
            timestamp: Timestamp::now(),
            message,
            audit_id: None,
            pending_audit_id: Some(pending_audit_id),
            retryable: false,
            duration_ms: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_audit_id.is_some()
    }
}

/// One execution measurement recorded by an agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionMetric {
    pub action_type: String,
    pub duration_ms: u64,
    pub success: bool,
    pub timestamp: Timestamp,
}

/// Aggregate execution statistics for one agent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub total_executions: usize,
    /// Successful results over total, `0.0` when nothing ran.
    pub success_rate: f64,
    pub average_execution_time_ms: f64,
    pub last_execution_at: Option<Timestamp>,
}

impl AgentMetrics {
    pub fn from_results(results: &[ActionResult]) -> Self {
        let total = results.len();
        if total == 0 {
            return Self::default();
        }
        let successes = results.iter().filter(|r| r.success).count();
        let total_ms: u64 = results.iter().map(|r| r.duration_ms).sum();
        Self {
            total_executions: total,
            success_rate: successes as f64 / total as f64,
            average_execution_time_ms: total_ms as f64 / total as f64,
            last_execution_at: results.iter().map(|r| r.timestamp).max(),
        }
    }
}

/// What a training run did.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Examples passed in.
    pub examples_received: usize,
    /// New examples kept after de-duplication.
    pub examples_added: usize,
    /// Examples the agent holds after this run.
    pub examples_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> AgentDescriptor {
        AgentDescriptor {
            id: Uuid::new_v4(),
            name: "Email Assistant".into(),
            description: String::new(),
            capabilities: ["archive_email".to_string()].into_iter().collect(),
            kind: AgentKind::Email,
            version: 1,
            status: AgentStatus::Active,
            autonomy_level: AutonomyLevel::Supervised,
            require_confirmation: false,
            created_at: Timestamp(0),
            last_modified_at: Timestamp(0),
            preferences: Map::new(),
        }
    }

    fn result(success: bool, duration_ms: u64, at: i64) -> ActionResult {
        let action = ActionRequest::new("archive_email", Map::new());
        let mut r = if success {
            ActionResult::succeeded(action, Value::Null, Uuid::new_v4(), duration_ms)
        } else {
            ActionResult::failed(action, &ActionError::Provider("boom".into()), None, duration_ms)
        };
        r.timestamp = Timestamp(at);
        r
    }

    #[test]
    fn test_enum_display_and_parse() {
        for s in [AgentStatus::Active, AgentStatus::Inactive, AgentStatus::Training] {
            assert_eq!(s.to_string().parse::<AgentStatus>().unwrap(), s);
        }
        for l in [
            AutonomyLevel::Supervised,
            AutonomyLevel::Autonomous,
            AutonomyLevel::Manual,
        ] {
            assert_eq!(l.to_string().parse::<AutonomyLevel>().unwrap(), l);
        }
        assert_eq!(AuditStatus::AutoApproved.to_string(), "auto_approved");
        assert_eq!(
            "asleep".parse::<AgentStatus>().unwrap_err(),
            "Unknown agent status: asleep"
        );
    }

    #[test]
    fn test_apply_update_bumps_version() {
        let mut d = descriptor();
        let changed = d.apply(AgentConfigUpdate {
            name: Some("Inbox Helper".into()),
            require_confirmation: Some(true),
            ..Default::default()
        });
        assert!(changed);
        assert_eq!(d.name, "Inbox Helper");
        assert!(d.require_confirmation);
        assert_eq!(d.version, 2);
    }

    #[test]
    fn test_apply_noop_update_keeps_version() {
        let mut d = descriptor();
        assert!(!d.apply(AgentConfigUpdate::default()));
        assert_eq!(d.version, 1);
        assert_eq!(d.last_modified_at, Timestamp(0));
    }

    #[test]
    fn test_apply_merges_preferences() {
        let mut d = descriptor();
        d.preferences.insert("tone".into(), Value::from("formal"));
        let mut prefs = Map::new();
        prefs.insert("signature".into(), Value::from("Thanks"));
        d.apply(AgentConfigUpdate {
            preferences: Some(prefs),
            ..Default::default()
        });
        assert_eq!(d.preferences.len(), 2);
    }

    #[test]
    fn test_result_constructors() {
        let action = ActionRequest::new("archive_email", Map::new());
        let id = Uuid::new_v4();

        let ok = ActionResult::succeeded(action.clone(), Value::Null, id, 5);
        assert!(ok.success && ok.error.is_none());
        assert_eq!(ok.audit_id, Some(id));
        assert!(ok.pending_audit_id.is_none());

        let pending = ActionResult::deferred(action.clone(), id);
        assert!(!pending.success && pending.error.is_none());
        assert!(pending.is_pending());
        assert!(pending.audit_id.is_none());

        let failed = ActionResult::failed(action, &ActionError::Timeout(100), Some(id), 100);
        assert!(failed.retryable);
        assert!(failed.error.unwrap().contains("timed out"));
        assert!(failed.message.starts_with("'archive_email' failed"));
    }

    #[test]
    fn test_metrics_empty_is_zero() {
        let m = AgentMetrics::from_results(&[]);
        assert_eq!(m.total_executions, 0);
        assert_eq!(m.success_rate, 0.0);
        assert!(m.last_execution_at.is_none());
    }

    #[test]
    fn test_metrics_from_results() {
        let results = vec![result(true, 10, 100), result(false, 30, 300), result(true, 20, 200)];
        let m = AgentMetrics::from_results(&results);
        assert_eq!(m.total_executions, 3);
        assert!((m.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.average_execution_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(m.last_execution_at, Some(Timestamp(300)));
    }
}
