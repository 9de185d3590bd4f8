//! Agent orchestrator.
//!
//! The single entry point the host calls. Owns the agent registry, forwards
//! user actions to the pattern learner, publishes pattern and suggestion
//! snapshots, and routes actions to agents either directly or through the
//! [`ActionQueue`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use cadence_core::store::{load_json, save_json};
use cadence_core::{
    ActionRequest, CadenceConfig, DomainEvent, EventBus, KeyValueStore, NoticeLevel, Timestamp,
    UserAction,
};
use cadence_insight::{AgentSuggestion, PatternLearner, PatternType, PatternUpdate, WorkflowPattern};
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use uuid::Uuid;

use crate::agent::{build_behavior, Agent, AgentContext, AgentServices};
use crate::audit::AuditLedger;
use crate::backoff::{BackoffExecutor, BackoffPolicy};
use crate::error::ActionError;
use crate::provider::CompletionProvider;
use crate::queue::{ActionQueue, ResultSink};
use crate::rate_limit::RateLimiter;
use crate::types::{
    ActionResult, AgentConfigUpdate, AgentDescriptor, AgentMetrics, AgentSpec, AgentStatus,
    AutonomyLevel, TrainingReport,
};

/// Storage key for persisted agent descriptors.
pub const AGENTS_KEY: &str = "cadence.agents";

/// Storage key for persisted per-agent execution results.
pub const RESULTS_KEY: &str = "cadence.results";

/// Most-recent results kept per agent when state is persisted.
const PERSISTED_RESULTS_PER_AGENT: usize = 200;

type ResultHistory = Arc<Mutex<HashMap<Uuid, Vec<ActionResult>>>>;

/// Clears an agent's executing mark when dropped.
struct ExecutingGuard<'a> {
    executing: &'a Mutex<HashMap<Uuid, usize>>,
    agent_id: Uuid,
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        let mut executing = self.executing.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = executing.get_mut(&self.agent_id) {
            *count -= 1;
            if *count == 0 {
                executing.remove(&self.agent_id);
            }
        }
    }
}

pub struct Orchestrator {
    config: CadenceConfig,
    learner: Mutex<PatternLearner>,
    agents: RwLock<HashMap<Uuid, Arc<Agent>>>,
    executing: Mutex<HashMap<Uuid, usize>>,
    results: ResultHistory,
    services: AgentServices,
    context: AgentContext,
    queue: ActionQueue,
    patterns_tx: watch::Sender<Vec<WorkflowPattern>>,
    suggestions_tx: watch::Sender<Vec<AgentSuggestion>>,
}

impl Orchestrator {
    pub fn new(
        config: CadenceConfig,
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let events = EventBus::new();
        let services = AgentServices {
            ledger: Arc::new(AuditLedger::new()),
            rate_limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            events: events.clone(),
        };
        let context = AgentContext::new(
            provider,
            BackoffExecutor::new(BackoffPolicy::from_config(&config.backoff)),
            store,
        );

        let results: ResultHistory = Arc::new(Mutex::new(HashMap::new()));
        let history = Arc::clone(&results);
        let sink: ResultSink = Arc::new(move |agent_id: Uuid, result: &ActionResult| {
            record_result(&history, agent_id, result.clone());
        });
        let queue = ActionQueue::new(&config.queue, events, Some(sink));

        let (patterns_tx, _) = watch::channel(Vec::new());
        let (suggestions_tx, _) = watch::channel(Vec::new());

        Self {
            learner: Mutex::new(PatternLearner::new(config.learner.clone())),
            config,
            agents: RwLock::new(HashMap::new()),
            executing: Mutex::new(HashMap::new()),
            results,
            services,
            context,
            queue,
            patterns_tx,
            suggestions_tx,
        }
    }

    fn learner(&self) -> MutexGuard<'_, PatternLearner> {
        self.learner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn agent(&self, agent_id: Uuid) -> Result<Arc<Agent>, ActionError> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&agent_id)
            .cloned()
            .ok_or(ActionError::AgentNotFound(agent_id))
    }

    pub fn events(&self) -> &EventBus {
        &self.services.events
    }

    pub fn audit_ledger(&self) -> &Arc<AuditLedger> {
        &self.services.ledger
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub fn config(&self) -> &CadenceConfig {
        &self.config
    }

    fn notice(&self, level: NoticeLevel, message: String) {
        self.services.events.emit(DomainEvent::Notice {
            level,
            message,
            timestamp: Timestamp::now(),
        });
    }

    // =========================================================================
    // Pattern Learning
    // =========================================================================

    /// Feed a user action to the learner and publish fresh snapshots.
    pub fn record_action(&self, action: UserAction) -> Option<PatternUpdate> {
        let update = self.learner().record_action(action);
        if let Some(PatternUpdate::Created(pattern)) = &update {
            self.emit_pattern_detected(pattern);
        }
        if update.is_some() {
            self.publish_snapshots();
        }
        update
    }

    /// Recluster the whole history and publish fresh snapshots.
    pub fn analyze_patterns(&self) -> Vec<PatternUpdate> {
        let updates = self.learner().analyze_patterns();
        for update in &updates {
            if let PatternUpdate::Created(pattern) = update {
                self.emit_pattern_detected(pattern);
            }
        }
        if !updates.is_empty() {
            self.publish_snapshots();
        }
        updates
    }

    /// Forget all learned history and patterns.
    pub fn reset_patterns(&self) {
        self.learner().reset();
        self.publish_snapshots();
    }

    fn emit_pattern_detected(&self, pattern: &WorkflowPattern) {
        self.services.events.emit(DomainEvent::PatternDetected {
            pattern_id: pattern.id,
            action_type: pattern.triggers.join(","),
            frequency: pattern.frequency,
            timestamp: Timestamp::now(),
        });
    }

    fn publish_snapshots(&self) {
        let (patterns, suggestions) = {
            let learner = self.learner();
            (learner.patterns().to_vec(), learner.suggest_automations())
        };
        self.patterns_tx.send_replace(patterns);

        let count = suggestions.len();
        let changed = self.suggestions_tx.send_if_modified(|current| {
            if *current != suggestions {
                *current = suggestions;
                true
            } else {
                false
            }
        });
        if changed {
            self.services.events.emit(DomainEvent::SuggestionsUpdated {
                count,
                timestamp: Timestamp::now(),
            });
        }
    }

    /// Receiver that observes every published pattern snapshot.
    pub fn subscribe_patterns(&self) -> watch::Receiver<Vec<WorkflowPattern>> {
        self.patterns_tx.subscribe()
    }

    /// Receiver that is notified only when the suggestion set changes.
    pub fn subscribe_suggestions(&self) -> watch::Receiver<Vec<AgentSuggestion>> {
        self.suggestions_tx.subscribe()
    }

    pub fn get_patterns(&self) -> Vec<WorkflowPattern> {
        self.learner().patterns().to_vec()
    }

    pub fn get_pattern(&self, pattern_id: Uuid) -> Option<WorkflowPattern> {
        self.learner().pattern(pattern_id).cloned()
    }

    pub fn get_suggestions(&self) -> Vec<AgentSuggestion> {
        self.learner().suggest_automations()
    }

    // =========================================================================
    // Agent Lifecycle
    // =========================================================================

    /// Register a new agent.
    pub fn create_agent(&self, spec: AgentSpec) -> Result<AgentDescriptor, ActionError> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(ActionError::Validation("agent name is empty".to_string()));
        }
        let capabilities: BTreeSet<String> = spec
            .capabilities
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if capabilities.is_empty() {
            return Err(ActionError::Validation(
                "agent needs at least one capability".to_string(),
            ));
        }

        let autonomy_level = match spec.autonomy_level {
            Some(level) => level,
            None => self
                .config
                .agents
                .default_autonomy
                .parse::<AutonomyLevel>()
                .map_err(ActionError::Validation)?,
        };

        let now = Timestamp::now();
        let descriptor = AgentDescriptor {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: spec.description,
            capabilities,
            kind: spec.kind,
            version: 1,
            status: AgentStatus::Active,
            autonomy_level,
            require_confirmation: spec
                .require_confirmation
                .unwrap_or(self.config.agents.require_confirmation),
            created_at: now,
            last_modified_at: now,
            preferences: spec.preferences,
        };

        self.register(descriptor.clone());
        tracing::info!(
            agent_id = %descriptor.id,
            name = %descriptor.name,
            kind = %descriptor.kind,
            "Agent created"
        );
        self.services.events.emit(DomainEvent::AgentCreated {
            agent_id: descriptor.id,
            name: descriptor.name.clone(),
            kind: descriptor.kind.to_string(),
            timestamp: Timestamp::now(),
        });
        Ok(descriptor)
    }

    fn register(&self, descriptor: AgentDescriptor) {
        let behavior = build_behavior(descriptor.kind, self.context.clone());
        let agent = Arc::new(Agent::new(descriptor, behavior, self.services.clone()));
        self.agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agent.id(), agent);
    }

    /// Turn a pattern into a supervised agent.
    ///
    /// Learning patterns train the new agent on the pattern's action window.
    /// Failures surface as a `Notice` event and `None`.
    pub async fn create_agent_from_pattern(
        &self,
        pattern: &WorkflowPattern,
    ) -> Option<AgentDescriptor> {
        let mut preferences = Map::new();
        preferences.insert("pattern_id".to_string(), json!(pattern.id));

        let spec = AgentSpec {
            name: format!("{} Assistant", pattern.category.label()),
            description: pattern.description.clone(),
            kind: pattern.category,
            capabilities: pattern.distinct_action_types(),
            autonomy_level: Some(AutonomyLevel::Supervised),
            require_confirmation: None,
            preferences,
        };

        let descriptor = match self.create_agent(spec) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(pattern_id = %pattern.id, error = %e, "Could not create agent from pattern");
                self.notice(
                    NoticeLevel::Error,
                    format!("Could not create an agent for '{}': {}", pattern.name, e),
                );
                return None;
            }
        };

        if pattern.pattern_type == PatternType::Learning {
            match self.train_agent(descriptor.id, pattern.actions.clone()).await {
                Ok(report) if report.error.is_none() => {}
                Ok(report) => self.notice(
                    NoticeLevel::Warning,
                    format!(
                        "{} was created but training failed: {}",
                        descriptor.name,
                        report.error.unwrap_or_default()
                    ),
                ),
                Err(e) => self.notice(
                    NoticeLevel::Warning,
                    format!("{} was created but training failed: {}", descriptor.name, e),
                ),
            }
        }

        self.notice(
            NoticeLevel::Info,
            format!("Created {} from a recurring pattern", descriptor.name),
        );
        self.get_agent(descriptor.id)
    }

    pub async fn train_agent(
        &self,
        agent_id: Uuid,
        data: Vec<UserAction>,
    ) -> Result<TrainingReport, ActionError> {
        let agent = self.agent(agent_id)?;
        Ok(agent.train(&data).await)
    }

    /// Examples the agent has been trained on, oldest first.
    pub fn training_examples(&self, agent_id: Uuid) -> Result<Vec<UserAction>, ActionError> {
        self.agent(agent_id)?;
        self.context.training_examples(agent_id)
    }

    pub fn update_agent_config(
        &self,
        agent_id: Uuid,
        update: AgentConfigUpdate,
    ) -> Result<AgentDescriptor, ActionError> {
        if let Some(capabilities) = &update.capabilities {
            if capabilities.iter().all(|c| c.trim().is_empty()) {
                return Err(ActionError::Validation(
                    "agent needs at least one capability".to_string(),
                ));
            }
        }
        let agent = self.agent(agent_id)?;
        let mut changed = false;
        let descriptor = agent.update_descriptor(|d| changed = d.apply(update));
        if changed {
            tracing::info!(agent_id = %agent_id, version = descriptor.version, "Agent config updated");
        }
        Ok(descriptor)
    }

    pub fn set_agent_status(
        &self,
        agent_id: Uuid,
        status: AgentStatus,
    ) -> Result<AgentDescriptor, ActionError> {
        Ok(self.agent(agent_id)?.set_status(status))
    }

    pub fn get_agent(&self, agent_id: Uuid) -> Option<AgentDescriptor> {
        self.agent(agent_id).ok().map(|a| a.descriptor())
    }

    /// Every registered agent, oldest first.
    pub fn get_agents(&self) -> Vec<AgentDescriptor> {
        let mut agents: Vec<AgentDescriptor> = self
            .agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|a| a.descriptor())
            .collect();
        agents.sort_by_key(|d| (d.created_at, d.id));
        agents
    }

    pub fn get_active_agents(&self) -> Vec<AgentDescriptor> {
        self.get_agents()
            .into_iter()
            .filter(|d| d.status == AgentStatus::Active)
            .collect()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    pub fn is_executing(&self, agent_id: Uuid) -> bool {
        self.executing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&agent_id)
    }

    /// Run an action on an agent right away.
    ///
    /// Only an unknown agent id is an error; every other outcome is an
    /// [`ActionResult`] and is recorded under the agent.
    pub async fn execute_agent_action(
        &self,
        agent_id: Uuid,
        action_type: &str,
        params: Map<String, Value>,
    ) -> Result<ActionResult, ActionError> {
        self.execute_request(agent_id, ActionRequest::new(action_type, params))
            .await
    }

    pub async fn execute_request(
        &self,
        agent_id: Uuid,
        request: ActionRequest,
    ) -> Result<ActionResult, ActionError> {
        let agent = self.agent(agent_id)?;

        *self
            .executing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(agent_id)
            .or_insert(0) += 1;
        let _guard = ExecutingGuard {
            executing: &self.executing,
            agent_id,
        };

        let result = agent.execute_action(&request).await;
        record_result(&self.results, agent_id, result.clone());
        Ok(result)
    }

    /// Queue an action for an agent.
    ///
    /// Priority falls back to the request's own, then the configured default.
    pub fn enqueue_action(
        &self,
        agent_id: Uuid,
        request: ActionRequest,
        priority: Option<i32>,
    ) -> Result<Uuid, ActionError> {
        let agent = self.agent(agent_id)?;
        let priority = priority
            .or(request.priority)
            .unwrap_or(self.config.queue.default_priority);
        Ok(self.queue.add_to_queue(agent, request, priority))
    }

    /// Results recorded for an agent, oldest first.
    pub fn get_agent_results(&self, agent_id: Uuid) -> Vec<ActionResult> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_agent_metrics(&self, agent_id: Uuid) -> Result<AgentMetrics, ActionError> {
        self.agent(agent_id)?;
        Ok(AgentMetrics::from_results(&self.get_agent_results(agent_id)))
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Save agent descriptors, recent results, the action history and learned patterns.
    pub fn persist_state(&self) -> Result<(), ActionError> {
        let store = self.context.store.as_ref();
        let agents = self.get_agents();
        save_json(store, AGENTS_KEY, &agents)?;

        let results: HashMap<Uuid, Vec<ActionResult>> = self
            .results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, results)| {
                let skip = results.len().saturating_sub(PERSISTED_RESULTS_PER_AGENT);
                (*id, results[skip..].to_vec())
            })
            .collect();
        save_json(store, RESULTS_KEY, &results)?;

        self.learner().save(store)?;
        tracing::info!(agents = agents.len(), "State persisted");
        Ok(())
    }

    /// Reload everything saved by [`Orchestrator::persist_state`].
    ///
    /// Agents already registered under the same id are kept as they are, and
    /// results already held in memory are not duplicated.
    /// Returns the number of agents restored.
    pub fn restore_state(&self) -> Result<usize, ActionError> {
        let store = self.context.store.as_ref();
        let descriptors: Vec<AgentDescriptor> = load_json(store, AGENTS_KEY)?.unwrap_or_default();

        let mut restored = 0;
        for descriptor in descriptors {
            if self.agent(descriptor.id).is_ok() {
                continue;
            }
            self.register(descriptor);
            restored += 1;
        }

        let saved: HashMap<Uuid, Vec<ActionResult>> =
            load_json(store, RESULTS_KEY)?.unwrap_or_default();
        {
            let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
            for (agent_id, mut earlier) in saved {
                let current = results.entry(agent_id).or_default();
                earlier.retain(|r| !current.contains(r));
                earlier.append(current);
                *current = earlier;
            }
        }

        let patterns = self.learner().load(store)?;
        self.publish_snapshots();
        tracing::info!(agents = restored, patterns, "State restored");
        Ok(restored)
    }
}

fn record_result(history: &ResultHistory, agent_id: Uuid, result: ActionResult) {
    history
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .entry(agent_id)
        .or_default()
        .push(result);
}
