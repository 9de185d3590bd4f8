use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// =============================================================================
// Enums
// =============================================================================

/// The specialisations an agent can have.
///
/// Shared between pattern learning (a pattern's category) and the agent
/// registry (which behaviour to instantiate).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Email,
    Document,
    Task,
    Calendar,
    Workflow,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Email,
        AgentKind::Document,
        AgentKind::Task,
        AgentKind::Calendar,
        AgentKind::Workflow,
    ];

    /// Title-cased label used in generated agent names.
    pub fn label(&self) -> &'static str {
        match self {
            AgentKind::Email => "Email",
            AgentKind::Document => "Document",
            AgentKind::Task => "Task",
            AgentKind::Calendar => "Calendar",
            AgentKind::Workflow => "Workflow",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::Email => write!(f, "email"),
            AgentKind::Document => write!(f, "document"),
            AgentKind::Task => write!(f, "task"),
            AgentKind::Calendar => write!(f, "calendar"),
            AgentKind::Workflow => write!(f, "workflow"),
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(AgentKind::Email),
            "document" => Ok(AgentKind::Document),
            "task" => Ok(AgentKind::Task),
            "calendar" => Ok(AgentKind::Calendar),
            "workflow" => Ok(AgentKind::Workflow),
            _ => Err(format!("Unknown agent kind: {}", s)),
        }
    }
}

// =============================================================================
// Newtype Wrappers
// =============================================================================

/// Milliseconds since the Unix epoch (UTC).
///
/// Compared by value. Two Timestamps with the same inner value are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }

    /// Milliseconds elapsed between `earlier` and `self`, clamped at zero.
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        (self.0 - earlier.0).max(0) as u64
    }
}

// =============================================================================
// Value Objects
// =============================================================================

/// A single action performed by a user, as observed by the host application.
///
/// Immutable, append-only input to pattern learning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub timestamp: Timestamp,
    pub user_id: String,
}

impl UserAction {
    /// Create an action stamped with the current time and an empty payload.
    pub fn new(action_type: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: Map::new(),
            timestamp: Timestamp::now(),
            user_id: user_id.into(),
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }
}

/// A discrete unit of work submitted to one agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
}

impl ActionRequest {
    pub fn new(action_type: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            action_type: action_type.into(),
            params,
            priority: None,
            callback_id: None,
        }
    }

    /// Build a request from a JSON object; non-object values yield empty params.
    pub fn from_json(action_type: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(action_type, params)
    }

    /// Look up a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}
