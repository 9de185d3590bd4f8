//! Error types for agent execution.

use cadence_core::error::CadenceError;
use cadence_insight::InsightError;
use uuid::Uuid;

use crate::types::AuditStatus;

/// Errors raised while routing or executing an action.
///
/// Capability, validation and unknown-type errors are terminal. Timeout and
/// provider errors may be retried by whichever component issued the call.
/// Rate-limited requests should be resubmitted later.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("Agent lacks capability: {0}")]
    Capability(String),
    #[error("Invalid action: {0}")]
    Validation(String),
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),
    #[error("Rate limit exceeded for agent {0}")]
    RateLimited(Uuid),
    #[error("Completion provider failed: {0}")]
    Provider(String),
    #[error("Unknown type: {0}")]
    UnknownType(String),
    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),
    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
    #[error("Storage error: {0}")]
    Store(String),
}

impl ActionError {
    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActionError::Timeout(_) | ActionError::Provider(_) | ActionError::RateLimited(_)
        )
    }

    /// Short explanation suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ActionError::Capability(_) => "the agent is not allowed to do this",
            ActionError::Validation(_) => "the request was malformed",
            ActionError::Timeout(_) => "the operation took too long",
            ActionError::RateLimited(_) => "the agent is busy, try again shortly",
            ActionError::Provider(_) => "the assistant service is unavailable",
            ActionError::UnknownType(_) => "this kind of request is not supported",
            ActionError::AgentNotFound(_) => "the agent no longer exists",
            ActionError::Audit(_) | ActionError::Store(_) => "an internal error occurred",
        }
    }
}

impl From<CadenceError> for ActionError {
    fn from(err: CadenceError) -> Self {
        ActionError::Store(err.to_string())
    }
}

impl From<InsightError> for ActionError {
    fn from(err: InsightError) -> Self {
        ActionError::Store(err.to_string())
    }
}

/// Errors from the audit ledger.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuditError {
    #[error("Audit entry not found: {0}")]
    NotFound(Uuid),
    #[error("Invalid audit transition: {0} -> {1}")]
    InvalidTransition(AuditStatus, AuditStatus),
    #[error("Audit entry already completed: {0}")]
    AlreadyCompleted(Uuid),
    #[error("Audit entry awaiting confirmation: {0}")]
    AwaitingConfirmation(Uuid),
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}
