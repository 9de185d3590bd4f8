//! Agent execution contract.
//!
//! An [`Agent`] wraps a registry descriptor and an [`AgentBehavior`]. Every
//! request runs through the same gate sequence:
//!
//! received -> validation -> capability -> rate limit -> audit entry
//! -> [confirmation gate] -> perform -> completed | failed
//!
//! `execute_action` never returns an error. Rejections and failures come
//! back as a failed [`ActionResult`] with a matching audit entry.

pub mod calendar;
pub mod document;
pub mod email;
pub mod task;
pub mod workflow;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::store::{load_json, save_json};
use cadence_core::{
    ActionRequest, AgentKind, DomainEvent, EventBus, KeyValueStore, Timestamp, UserAction,
};
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;

use crate::audit::{AuditDraft, AuditLedger, AuditOutcome};
use crate::backoff::BackoffExecutor;
use crate::error::ActionError;
use crate::provider::{CompletionOptions, CompletionProvider};
use crate::rate_limit::RateLimiter;
use crate::types::{
    ActionMetric, ActionResult, AgentDescriptor, AgentStatus, AuditStatus, TrainingReport,
};

pub use calendar::CalendarAgent;
pub use document::DocumentAgent;
pub use email::EmailAgent;
pub use task::TaskAgent;
pub use workflow::WorkflowAgent;

/// Training examples kept per agent; older ones are discarded first.
pub const MAX_TRAINING_EXAMPLES: usize = 50;

/// Examples included in a prompt.
const PROMPT_EXAMPLES: usize = 3;

// =============================================================================
// Behaviour Trait
// =============================================================================

/// Domain-specific half of an agent.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Check request parameters before anything is audited.
    fn validate(&self, _action: &ActionRequest) -> Result<(), ActionError> {
        Ok(())
    }

    /// One-line description stored on the audit entry.
    fn describe(&self, action: &ActionRequest) -> String {
        format!("{} agent: {}", self.kind(), action.action_type)
    }

    async fn perform_action(
        &self,
        agent: &AgentDescriptor,
        action: &ActionRequest,
    ) -> Result<Value, ActionError>;

    /// Learn from past user actions. Safe to call repeatedly.
    async fn train(
        &self,
        agent: &AgentDescriptor,
        data: &[UserAction],
    ) -> Result<TrainingReport, ActionError>;
}

/// Build the behaviour for an agent kind.
pub fn build_behavior(kind: AgentKind, ctx: AgentContext) -> Box<dyn AgentBehavior> {
    match kind {
        AgentKind::Email => Box::new(EmailAgent::new(ctx)),
        AgentKind::Document => Box::new(DocumentAgent::new(ctx)),
        AgentKind::Task => Box::new(TaskAgent::new(ctx)),
        AgentKind::Calendar => Box::new(CalendarAgent::new(ctx)),
        AgentKind::Workflow => Box::new(WorkflowAgent::new(ctx)),
    }
}

/// Parse an agent kind name such as `"email"`.
pub fn parse_agent_kind(s: &str) -> Result<AgentKind, ActionError> {
    s.parse::<AgentKind>()
        .map_err(|_| ActionError::UnknownType(s.to_string()))
}

// =============================================================================
// Shared Context
// =============================================================================

/// Collaborators handed to every behaviour.
#[derive(Clone)]
pub struct AgentContext {
    pub provider: Arc<dyn CompletionProvider>,
    pub backoff: BackoffExecutor,
    pub store: Arc<dyn KeyValueStore>,
    pub options: CompletionOptions,
}

impl AgentContext {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        backoff: BackoffExecutor,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            provider,
            backoff,
            store,
            options: CompletionOptions::default(),
        }
    }

    /// Ask the provider for a completion under the backoff policy.
    pub async fn complete(&self, prompt: &str) -> Result<String, ActionError> {
        let provider = &self.provider;
        let options = &self.options;
        self.backoff
            .with_timeout(move || provider.get_completion(prompt, options))
            .await
    }

    pub fn training_examples(&self, agent_id: Uuid) -> Result<Vec<UserAction>, ActionError> {
        Ok(load_json(self.store.as_ref(), &training_key(agent_id))?.unwrap_or_default())
    }

    /// Merge new examples into the agent's stored set, skipping duplicates.
    pub fn store_training_examples(
        &self,
        agent_id: Uuid,
        data: &[UserAction],
    ) -> Result<TrainingReport, ActionError> {
        let mut examples = self.training_examples(agent_id)?;
        let mut seen: HashSet<(String, String, i64)> = examples
            .iter()
            .map(|a| (a.action_type.clone(), a.user_id.clone(), a.timestamp.0))
            .collect();

        let mut added = 0;
        for action in data {
            let key = (
                action.action_type.clone(),
                action.user_id.clone(),
                action.timestamp.0,
            );
            if seen.insert(key) {
                examples.push(action.clone());
                added += 1;
            }
        }
        if examples.len() > MAX_TRAINING_EXAMPLES {
            let excess = examples.len() - MAX_TRAINING_EXAMPLES;
            examples.drain(..excess);
        }

        save_json(self.store.as_ref(), &training_key(agent_id), &examples)?;
        Ok(TrainingReport {
            examples_received: data.len(),
            examples_added: added,
            examples_total: examples.len(),
            error: None,
        })
    }

    /// Prompt prefix listing recent examples of the same action type.
    pub fn examples_prompt(&self, agent_id: Uuid, action_type: &str) -> String {
        let examples = match self.training_examples(agent_id) {
            Ok(examples) => examples,
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, error = %e, "Could not load training examples");
                return String::new();
            }
        };
        let relevant: Vec<String> = examples
            .iter()
            .rev()
            .filter(|a| a.action_type == action_type)
            .take(PROMPT_EXAMPLES)
            .map(|a| Value::Object(a.payload.clone()).to_string())
            .collect();
        if relevant.is_empty() {
            String::new()
        } else {
            format!("Previous examples:\n{}\n\n", relevant.join("\n"))
        }
    }
}

pub fn training_key(agent_id: Uuid) -> String {
    format!("cadence.training.{}", agent_id)
}

/// Infrastructure shared by all agents of one orchestrator.
#[derive(Clone, Default)]
pub struct AgentServices {
    pub ledger: Arc<AuditLedger>,
    pub rate_limiter: Arc<RateLimiter>,
    pub events: EventBus,
}

// =============================================================================
// Agent
// =============================================================================

pub struct Agent {
    descriptor: RwLock<AgentDescriptor>,
    behavior: Box<dyn AgentBehavior>,
    services: AgentServices,
    metrics: Mutex<Vec<ActionMetric>>,
    /// Serializes executions so direct calls and queue drains never interleave.
    exec_lock: tokio::sync::Mutex<()>,
}

impl Agent {
    pub fn new(
        descriptor: AgentDescriptor,
        behavior: Box<dyn AgentBehavior>,
        services: AgentServices,
    ) -> Self {
        Self {
            descriptor: RwLock::new(descriptor),
            behavior,
            services,
            metrics: Mutex::new(Vec::new()),
            exec_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.descriptor().id
    }

    /// Snapshot of the current descriptor.
    pub fn descriptor(&self) -> AgentDescriptor {
        self.descriptor
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Mutate the descriptor in place and return the new snapshot.
    pub fn update_descriptor<F>(&self, f: F) -> AgentDescriptor
    where
        F: FnOnce(&mut AgentDescriptor),
    {
        let mut descriptor = self.descriptor.write().unwrap_or_else(|e| e.into_inner());
        f(&mut descriptor);
        descriptor.clone()
    }

    /// Time until this agent's rate limit admits another request.
    pub fn rate_limit_wait(&self) -> Option<Duration> {
        self.services.rate_limiter.retry_after(self.id())
    }

    /// Execution measurements, oldest first.
    pub fn metrics(&self) -> Vec<ActionMetric> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record_metric(&self, action_type: &str, duration_ms: u64, success: bool) {
        self.metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ActionMetric {
                action_type: action_type.to_string(),
                duration_ms,
                success,
                timestamp: Timestamp::now(),
            });
    }

    fn gate(&self, descriptor: &AgentDescriptor, action: &ActionRequest) -> Result<(), ActionError> {
        if action.action_type.trim().is_empty() {
            return Err(ActionError::Validation("action type is empty".to_string()));
        }
        self.behavior.validate(action)?;
        if !descriptor.has_capability(&action.action_type) {
            return Err(ActionError::Capability(action.action_type.clone()));
        }
        self.services.rate_limiter.check(descriptor.id)
    }

    /// Run one request through the full gate sequence.
    pub async fn execute_action(&self, action: &ActionRequest) -> ActionResult {
        let _serial = self.exec_lock.lock().await;
        let descriptor = self.descriptor();
        let agent_id = descriptor.id;
        let started = Instant::now();

        if let Err(e) = self.gate(&descriptor, action) {
            return self.reject(&descriptor, action, e);
        }
        self.services.rate_limiter.record_request(agent_id);

        let status = if descriptor.require_confirmation {
            AuditStatus::Pending
        } else {
            AuditStatus::AutoApproved
        };
        let audit_id = match self.services.ledger.add_audit_log(AuditDraft {
            action_type: action.action_type.clone(),
            source_agent_id: agent_id,
            description: self.behavior.describe(action),
            status,
            details: json!({ "params": action.params, "callback_id": action.callback_id }),
        }) {
            Ok(id) => id,
            Err(e) => {
                let err = ActionError::from(e);
                tracing::error!(agent_id = %agent_id, error = %err, "Could not open audit entry");
                self.record_metric(&action.action_type, 0, false);
                return ActionResult::failed(action.clone(), &err, None, 0);
            }
        };

        if status == AuditStatus::Pending {
            tracing::info!(
                agent_id = %agent_id,
                action_type = %action.action_type,
                audit_id = %audit_id,
                "Action awaiting confirmation"
            );
            self.services.events.emit(DomainEvent::ActionDeferred {
                agent_id,
                action_type: action.action_type.clone(),
                audit_id,
                timestamp: Timestamp::now(),
            });
            return ActionResult::deferred(action.clone(), audit_id);
        }

        self.services.events.emit(DomainEvent::ActionStarted {
            agent_id,
            action_type: action.action_type.clone(),
            timestamp: Timestamp::now(),
        });

        let outcome = self.behavior.perform_action(&descriptor, action).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match outcome {
            Ok(data) => self
                .services
                .ledger
                .mark_action_completed(audit_id, AuditOutcome::success(data.clone()))
                .map(|_| data)
                .map_err(ActionError::from),
            Err(e) => {
                if let Err(audit_err) = self
                    .services
                    .ledger
                    .mark_action_completed(audit_id, AuditOutcome::failure(e.to_string()))
                {
                    tracing::error!(audit_id = %audit_id, error = %audit_err, "Could not close audit entry");
                }
                Err(e)
            }
        };

        match outcome {
            Ok(data) => {
                self.record_metric(&action.action_type, duration_ms, true);
                tracing::info!(
                    agent_id = %agent_id,
                    action_type = %action.action_type,
                    duration_ms,
                    "Action completed"
                );
                self.services.events.emit(DomainEvent::ActionCompleted {
                    agent_id,
                    action_type: action.action_type.clone(),
                    audit_id,
                    duration_ms,
                    timestamp: Timestamp::now(),
                });
                ActionResult::succeeded(action.clone(), data, audit_id, duration_ms)
            }
            Err(e) => {
                self.record_metric(&action.action_type, duration_ms, false);
                tracing::warn!(
                    agent_id = %agent_id,
                    action_type = %action.action_type,
                    error = %e,
                    "Action failed"
                );
                self.emit_failed(agent_id, action, &e);
                ActionResult::failed(action.clone(), &e, Some(audit_id), duration_ms)
            }
        }
    }

    /// Record a gate rejection in the ledger and build the failed result.
    fn reject(&self, descriptor: &AgentDescriptor, action: &ActionRequest, err: ActionError) -> ActionResult {
        let audit_id = self
            .services
            .ledger
            .add_audit_log(AuditDraft {
                action_type: action.action_type.clone(),
                source_agent_id: descriptor.id,
                description: format!("Rejected: {}", err),
                status: AuditStatus::Rejected,
                details: json!({ "params": action.params }),
            })
            .and_then(|id| {
                self.services
                    .ledger
                    .mark_action_completed(id, AuditOutcome::failure(err.to_string()))
                    .map(|_| id)
            });
        let audit_id = match audit_id {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(agent_id = %descriptor.id, error = %e, "Could not record rejection");
                None
            }
        };

        tracing::warn!(
            agent_id = %descriptor.id,
            action_type = %action.action_type,
            error = %err,
            "Action rejected"
        );
        self.record_metric(&action.action_type, 0, false);
        self.emit_failed(descriptor.id, action, &err);
        ActionResult::failed(action.clone(), &err, audit_id, 0)
    }

    fn emit_failed(&self, agent_id: Uuid, action: &ActionRequest, err: &ActionError) {
        self.services.events.emit(DomainEvent::ActionFailed {
            agent_id,
            action_type: action.action_type.clone(),
            error: err.to_string(),
            retryable: err.is_retryable(),
            timestamp: Timestamp::now(),
        });
    }

    /// Train the behaviour on past user actions.
    ///
    /// Never fails the caller; errors are reported in the returned report.
    pub async fn train(&self, data: &[UserAction]) -> TrainingReport {
        let _serial = self.exec_lock.lock().await;
        let previous = self.descriptor().status;
        let descriptor = self.set_status(AgentStatus::Training);

        let report = match self.behavior.train(&descriptor, data).await {
            Ok(report) => {
                tracing::info!(
                    agent_id = %descriptor.id,
                    added = report.examples_added,
                    total = report.examples_total,
                    "Agent trained"
                );
                report
            }
            Err(e) => {
                tracing::warn!(agent_id = %descriptor.id, error = %e, "Agent training failed");
                TrainingReport {
                    examples_received: data.len(),
                    error: Some(e.to_string()),
                    ..TrainingReport::default()
                }
            }
        };

        self.set_status(previous);
        report
    }

    /// Change the agent's status, emitting an event when it actually changes.
    pub fn set_status(&self, status: AgentStatus) -> AgentDescriptor {
        let mut changed = false;
        let descriptor = self.update_descriptor(|d| {
            if d.status != status {
                d.status = status;
                d.last_modified_at = Timestamp::now();
                changed = true;
            }
        });
        if changed {
            self.services.events.emit(DomainEvent::AgentStatusChanged {
                agent_id: descriptor.id,
                status: status.to_string(),
                timestamp: Timestamp::now(),
            });
        }
        descriptor
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::provider::StaticProvider;
    use crate::types::AutonomyLevel;
    use cadence_core::{EventKind, InMemoryStore};
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn descriptor(kind: AgentKind, capabilities: &[&str]) -> AgentDescriptor {
        AgentDescriptor {
            id: Uuid::new_v4(),
            name: format!("{} Assistant", kind.label()),
            description: String::new(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            kind,
            version: 1,
            status: AgentStatus::Active,
            autonomy_level: AutonomyLevel::Supervised,
            require_confirmation: false,
            created_at: Timestamp::now(),
            last_modified_at: Timestamp::now(),
            preferences: Map::new(),
        }
    }

    pub(crate) fn context(provider: Arc<StaticProvider>) -> AgentContext {
        AgentContext::new(
            provider,
            BackoffExecutor::new(BackoffPolicy {
                timeout: Duration::from_millis(100),
                retries: 0,
                backoff_factor: 1.5,
            }),
            Arc::new(InMemoryStore::new()),
        )
    }

    /// Behaviour that counts calls and fails on demand.
    pub(crate) struct ProbeBehavior {
        pub calls: Arc<AtomicUsize>,
        pub fail_with: Option<ActionError>,
    }

    #[async_trait]
    impl AgentBehavior for ProbeBehavior {
        fn kind(&self) -> AgentKind {
            AgentKind::Workflow
        }

        async fn perform_action(
            &self,
            _agent: &AgentDescriptor,
            action: &ActionRequest,
        ) -> Result<Value, ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(json!({ "handled": action.action_type })),
            }
        }

        async fn train(
            &self,
            _agent: &AgentDescriptor,
            data: &[UserAction],
        ) -> Result<TrainingReport, ActionError> {
            Ok(TrainingReport {
                examples_received: data.len(),
                examples_added: data.len(),
                examples_total: data.len(),
                error: None,
            })
        }
    }

    fn probe_agent(
        descriptor: AgentDescriptor,
        fail_with: Option<ActionError>,
    ) -> (Agent, Arc<AtomicUsize>, AgentServices) {
        let calls = Arc::new(AtomicUsize::new(0));
        let services = AgentServices::default();
        let agent = Agent::new(
            descriptor,
            Box::new(ProbeBehavior {
                calls: Arc::clone(&calls),
                fail_with,
            }),
            services.clone(),
        );
        (agent, calls, services)
    }

    fn request(action_type: &str) -> ActionRequest {
        ActionRequest::new(action_type, Map::new())
    }

    #[tokio::test]
    async fn test_success_pairs_with_completed_audit() {
        let (agent, calls, services) =
            probe_agent(descriptor(AgentKind::Workflow, &["sync_crm"]), None);
        let result = agent.execute_action(&request("sync_crm")).await;

        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entry = services.ledger.get(result.audit_id.unwrap()).unwrap();
        assert_eq!(entry.status, AuditStatus::AutoApproved);
        assert!(entry.outcome.unwrap().success);
        assert_eq!(agent.metrics().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_capability_is_rejected_and_audited() {
        let (agent, calls, services) =
            probe_agent(descriptor(AgentKind::Workflow, &["sync_crm"]), None);
        let result = agent.execute_action(&request("delete_everything")).await;

        assert!(!result.success);
        assert!(!result.retryable);
        assert!(result.error.unwrap().contains("capability"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let entry = services.ledger.get(result.audit_id.unwrap()).unwrap();
        assert_eq!(entry.status, AuditStatus::Rejected);
        assert!(!entry.outcome.unwrap().success);
    }

    #[tokio::test]
    async fn test_empty_action_type_is_validation_error() {
        let (agent, _, _) = probe_agent(descriptor(AgentKind::Workflow, &["sync_crm"]), None);
        let result = agent.execute_action(&request("")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Invalid action"));
    }

    #[tokio::test]
    async fn test_confirmation_gate_defers_without_performing() {
        let mut d = descriptor(AgentKind::Workflow, &["sync_crm"]);
        d.require_confirmation = true;
        let (agent, calls, services) = probe_agent(d, None);

        let result = agent.execute_action(&request("sync_crm")).await;
        assert!(!result.success);
        assert!(result.error.is_none());
        assert!(result.audit_id.is_none());
        let pending_id = result.pending_audit_id.unwrap();
        assert_eq!(services.ledger.get(pending_id).unwrap().status, AuditStatus::Pending);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(agent.metrics().is_empty());
    }

    #[tokio::test]
    async fn test_perform_failure_is_caught() {
        let (agent, calls, services) = probe_agent(
            descriptor(AgentKind::Workflow, &["sync_crm"]),
            Some(ActionError::Provider("503".into())),
        );
        let result = agent.execute_action(&request("sync_crm")).await;

        assert!(!result.success);
        assert!(result.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entry = services.ledger.get(result.audit_id.unwrap()).unwrap();
        assert_eq!(entry.status, AuditStatus::AutoApproved);
        assert_eq!(entry.outcome.unwrap().error.unwrap(), "Completion provider failed: 503");
        assert!(!agent.metrics()[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_agent_rejects() {
        let d = descriptor(AgentKind::Workflow, &["sync_crm"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let services = AgentServices {
            rate_limiter: Arc::new(RateLimiter::new(2, Duration::from_secs(60))),
            ..AgentServices::default()
        };
        let agent = Agent::new(
            d,
            Box::new(ProbeBehavior {
                calls: Arc::clone(&calls),
                fail_with: None,
            }),
            services,
        );

        assert!(agent.execute_action(&request("sync_crm")).await.success);
        assert!(agent.execute_action(&request("sync_crm")).await.success);
        let limited = agent.execute_action(&request("sync_crm")).await;
        assert!(!limited.success);
        assert!(limited.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(agent.execute_action(&request("sync_crm")).await.success);
    }

    #[tokio::test]
    async fn test_lifecycle_events_in_order() {
        let (agent, _, services) =
            probe_agent(descriptor(AgentKind::Workflow, &["sync_crm"]), None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = services.events.subscribe_all(move |e| {
            sink.lock().unwrap().push(e.kind());
        });

        agent.execute_action(&request("sync_crm")).await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventKind::ActionStarted, EventKind::ActionCompleted]
        );
    }

    #[tokio::test]
    async fn test_train_restores_status() {
        let (agent, _, _) = probe_agent(descriptor(AgentKind::Workflow, &["sync_crm"]), None);
        let data = vec![UserAction::new("sync_crm", "alice")];
        let report = agent.train(&data).await;
        assert_eq!(report.examples_received, 1);
        assert_eq!(agent.descriptor().status, AgentStatus::Active);
    }

    #[test]
    fn test_parse_agent_kind() {
        assert_eq!(parse_agent_kind("calendar").unwrap(), AgentKind::Calendar);
        assert_eq!(
            parse_agent_kind("fax").unwrap_err(),
            ActionError::UnknownType("fax".into())
        );
    }

    #[test]
    fn test_build_behavior_covers_every_kind() {
        let ctx = context(Arc::new(StaticProvider::default()));
        for kind in AgentKind::ALL {
            assert_eq!(build_behavior(kind, ctx.clone()).kind(), kind);
        }
    }

    #[test]
    fn test_training_examples_deduplicate_and_cap() {
        let ctx = context(Arc::new(StaticProvider::default()));
        let agent_id = Uuid::new_v4();
        let action = UserAction::new("label_email", "alice");

        let first = ctx.store_training_examples(agent_id, &[action.clone()]).unwrap();
        assert_eq!(first.examples_added, 1);
        let again = ctx.store_training_examples(agent_id, &[action]).unwrap();
        assert_eq!(again.examples_added, 0);
        assert_eq!(again.examples_total, 1);

        let many: Vec<UserAction> = (0..60)
            .map(|i| {
                let mut a = UserAction::new("label_email", format!("u{}", i));
                a.timestamp = Timestamp(i);
                a
            })
            .collect();
        let report = ctx.store_training_examples(agent_id, &many).unwrap();
        assert_eq!(report.examples_total, MAX_TRAINING_EXAMPLES);
    }
}
