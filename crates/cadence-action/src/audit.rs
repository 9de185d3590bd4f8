//! Append-only audit ledger for action attempts.
//!
//! Every action that reaches an agent leaves exactly one entry. Entries are
//! created as `pending`, `auto_approved` or `rejected`; a pending entry may
//! later move to `approved` or `rejected`. Completion attaches an outcome
//! once and is final. There is no deletion API.

use std::sync::{Mutex, MutexGuard};

use cadence_core::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AuditError;
use crate::types::AuditStatus;

/// Result attached to an entry on completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: Timestamp,
}

impl AuditOutcome {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            completed_at: Timestamp::now(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            completed_at: Timestamp::now(),
        }
    }
}

/// One action attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action_type: String,
    pub source_agent_id: Uuid,
    pub timestamp: Timestamp,
    pub description: String,
    pub status: AuditStatus,
    pub details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AuditOutcome>,
}

impl AuditEntry {
    pub fn is_completed(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Fields supplied by the caller when opening an entry.
#[derive(Clone, Debug)]
pub struct AuditDraft {
    pub action_type: String,
    pub source_agent_id: Uuid,
    pub description: String,
    pub status: AuditStatus,
    pub details: Value,
}

/// Validate a status change on an existing entry.
///
/// Valid transitions:
/// - Pending -> Approved
/// - Pending -> Rejected
pub fn validate_transition(from: AuditStatus, to: AuditStatus) -> Result<(), AuditError> {
    let valid = matches!(
        (from, to),
        (AuditStatus::Pending, AuditStatus::Approved) | (AuditStatus::Pending, AuditStatus::Rejected)
    );

    if valid {
        Ok(())
    } else {
        Err(AuditError::InvalidTransition(from, to))
    }
}

/// In-memory ledger shared by every agent of one orchestrator.
#[derive(Default)]
pub struct AuditLedger {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<AuditEntry>>, AuditError> {
        self.entries
            .lock()
            .map_err(|e| AuditError::Unavailable(format!("Lock poisoned: {}", e)))
    }

    /// Open a new entry and return its id.
    ///
    /// Entries cannot start out `approved`; that status is reached only
    /// through [`AuditLedger::approve`].
    pub fn add_audit_log(&self, draft: AuditDraft) -> Result<Uuid, AuditError> {
        if draft.status == AuditStatus::Approved {
            return Err(AuditError::InvalidTransition(
                AuditStatus::Pending,
                AuditStatus::Approved,
            ));
        }

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            action_type: draft.action_type,
            source_agent_id: draft.source_agent_id,
            timestamp: Timestamp::now(),
            description: draft.description,
            status: draft.status,
            details: draft.details,
            outcome: None,
        };
        let id = entry.id;

        tracing::debug!(
            audit_id = %id,
            agent_id = %entry.source_agent_id,
            action_type = %entry.action_type,
            status = %entry.status,
            "Audit entry created"
        );
        self.lock()?.push(entry);
        Ok(id)
    }

    /// Attach the final outcome to an entry.
    ///
    /// Pending entries must be approved or rejected first.
    pub fn mark_action_completed(&self, id: Uuid, outcome: AuditOutcome) -> Result<AuditEntry, AuditError> {
        let mut entries = self.lock()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(AuditError::NotFound(id))?;

        if entry.is_completed() {
            return Err(AuditError::AlreadyCompleted(id));
        }
        if entry.status == AuditStatus::Pending {
            return Err(AuditError::AwaitingConfirmation(id));
        }

        entry.outcome = Some(outcome);
        Ok(entry.clone())
    }

    /// Approve a pending entry. Running the action is up to the host.
    pub fn approve(&self, id: Uuid) -> Result<AuditEntry, AuditError> {
        self.transition(id, AuditStatus::Approved, None)
    }

    /// Reject a pending entry. The rejection is final.
    pub fn reject(&self, id: Uuid, reason: &str) -> Result<AuditEntry, AuditError> {
        self.transition(id, AuditStatus::Rejected, Some(AuditOutcome::failure(reason)))
    }

    fn transition(
        &self,
        id: Uuid,
        to: AuditStatus,
        outcome: Option<AuditOutcome>,
    ) -> Result<AuditEntry, AuditError> {
        let mut entries = self.lock()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(AuditError::NotFound(id))?;

        validate_transition(entry.status, to)?;
        entry.status = to;
        if outcome.is_some() {
            entry.outcome = outcome;
        }
        tracing::info!(audit_id = %id, status = %to, "Audit entry resolved");
        Ok(entry.clone())
    }

    pub fn get(&self, id: Uuid) -> Result<AuditEntry, AuditError> {
        self.lock()?
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(AuditError::NotFound(id))
    }

    /// All entries in creation order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Entries waiting for confirmation.
    pub fn pending(&self) -> Vec<AuditEntry> {
        self.lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.status == AuditStatus::Pending)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn for_agent(&self, agent_id: Uuid) -> Vec<AuditEntry> {
        self.lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.source_agent_id == agent_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
