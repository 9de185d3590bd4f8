//! End-to-end tests for the orchestrator.
//!
//! Each test builds its own orchestrator over an in-memory store and a
//! scripted completion provider.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_action::{
    ActionError, AgentSpec, AgentStatus, AuditStatus, Orchestrator, StaticProvider,
};
use cadence_core::{
    ActionRequest, AgentKind, CadenceConfig, DomainEvent, EventKind, InMemoryStore, UserAction,
};
use cadence_insight::PatternType;
use serde_json::{json, Map};
use uuid::Uuid;

// =============================================================================
// Helpers
// =============================================================================

fn test_config() -> CadenceConfig {
    let mut config = CadenceConfig::default();
    config.backoff.retries = 0;
    config.backoff.timeout_ms = 1_000;
    config
}

fn make_orchestrator(config: CadenceConfig, provider: StaticProvider) -> (Orchestrator, Arc<StaticProvider>) {
    let provider = Arc::new(provider);
    let orch = Orchestrator::new(config, provider.clone(), Arc::new(InMemoryStore::new()));
    (orch, provider)
}

fn record_from_users(orch: &Orchestrator, action_type: &str, users: &[&str]) {
    for user in users {
        orch.record_action(UserAction::new(action_type, *user));
    }
}

/// Collect one field of every event of `kind` into a shared vector.
fn collect<T, F>(orch: &Orchestrator, kind: EventKind, pick: F) -> Arc<Mutex<Vec<T>>>
where
    T: Send + 'static,
    F: Fn(&DomainEvent) -> Option<T> + Send + Sync + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = orch.events().subscribe(kind, move |e| {
        if let Some(v) = pick(e) {
            sink.lock().unwrap().push(v);
        }
    });
    // Handlers stay registered until unsubscribed.
    drop(sub);
    seen
}

// =============================================================================
// Learning
// =============================================================================

#[tokio::test]
async fn test_archive_email_scenario() {
    let (orch, _) = make_orchestrator(test_config(), StaticProvider::new("Archive"));
    record_from_users(&orch, "archive_email", &["alice", "bob", "carol"]);

    let patterns = orch.get_patterns();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].frequency, 3);
    assert_eq!(patterns[0].category, AgentKind::Email);

    let suggestions = orch.get_suggestions();
    assert_eq!(suggestions.len(), 1);
    assert!((suggestions[0].confidence - 0.7).abs() < 1e-9);
    assert_eq!(suggestions[0].pattern_id, patterns[0].id);

    let agent = orch.create_agent_from_pattern(&patterns[0]).await.unwrap();
    assert_eq!(agent.name, "Email Assistant");
    assert_eq!(orch.get_active_agents().len(), 1);

    let result = orch
        .execute_agent_action(agent.id, "archive_email", Map::new())
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);
}

#[test]
fn test_suggestion_threshold() {
    let mut config = test_config();
    config.learner.min_similar_actions = 1;
    let (orch, _) = make_orchestrator(config, StaticProvider::default());

    record_from_users(&orch, "export_report", &["alice", "bob"]);
    assert_eq!(orch.get_patterns()[0].frequency, 2);
    assert!(orch.get_suggestions().is_empty());

    record_from_users(&orch, "export_report", &["carol"]);
    assert_eq!(orch.get_patterns()[0].frequency, 3);
    assert_eq!(orch.get_suggestions().len(), 1);
}

#[test]
fn test_suggestions_and_analysis_idempotent() {
    let (orch, _) = make_orchestrator(test_config(), StaticProvider::default());
    record_from_users(&orch, "archive_email", &["alice", "bob", "carol"]);

    assert_eq!(orch.get_suggestions(), orch.get_suggestions());
    orch.analyze_patterns();
    let before = orch.get_patterns();
    assert!(orch.analyze_patterns().is_empty());
    assert_eq!(orch.get_patterns(), before);
}

#[test]
fn test_watch_channels_follow_learning() {
    let (orch, _) = make_orchestrator(test_config(), StaticProvider::default());
    let mut patterns = orch.subscribe_patterns();
    let mut suggestions = orch.subscribe_suggestions();

    record_from_users(&orch, "archive_email", &["alice", "bob"]);
    assert!(!patterns.has_changed().unwrap());

    record_from_users(&orch, "archive_email", &["carol"]);
    assert!(patterns.has_changed().unwrap());
    assert!(suggestions.has_changed().unwrap());
    assert_eq!(patterns.borrow_and_update().len(), 1);
    assert_eq!(suggestions.borrow_and_update().len(), 1);

    // An action that matches no pattern publishes nothing.
    orch.record_action(UserAction::new("open_settings", "alice"));
    assert!(!patterns.has_changed().unwrap());
    assert!(!suggestions.has_changed().unwrap());

    record_from_users(&orch, "archive_email", &["dave"]);
    assert!(patterns.has_changed().unwrap());
    assert_eq!(patterns.borrow_and_update()[0].frequency, 4);
    assert_eq!(suggestions.borrow_and_update().len(), 1);
}

#[tokio::test]
async fn test_learning_pattern_trains_new_agent() {
    let (orch, _) = make_orchestrator(test_config(), StaticProvider::default());
    let users = ["u1", "u2", "u3", "u4", "u5", "u6", "u7"];
    record_from_users(&orch, "label_email", &users);

    let pattern = orch.get_patterns().remove(0);
    assert_eq!(pattern.pattern_type, PatternType::Learning);
    assert_eq!(pattern.frequency, 7);
    assert_eq!(pattern.actions.len(), 5);

    let agent = orch.create_agent_from_pattern(&pattern).await.unwrap();
    let examples = orch.training_examples(agent.id).unwrap();
    assert_eq!(examples.len(), 5);
    assert_eq!(examples.last().unwrap().user_id, "u7");
    assert_eq!(orch.get_agent(agent.id).unwrap().status, AgentStatus::Active);
}

// =============================================================================
// Execution
// =============================================================================

#[tokio::test]
async fn test_unknown_agent_is_not_found() {
    let (orch, _) = make_orchestrator(test_config(), StaticProvider::default());
    let id = Uuid::new_v4();
    assert_eq!(
        orch.execute_agent_action(id, "archive_email", Map::new())
            .await
            .unwrap_err(),
        ActionError::AgentNotFound(id)
    );
    assert!(orch
        .enqueue_action(id, ActionRequest::new("archive_email", Map::new()), None)
        .is_err());
}

#[tokio::test]
async fn test_successful_results_pair_with_audit_entries() {
    let (orch, _) = make_orchestrator(test_config(), StaticProvider::new("Done"));
    let agent = orch
        .create_agent(AgentSpec::new("Docs", AgentKind::Document, ["summarize_document"]))
        .unwrap();

    for text in ["first draft", "second draft"] {
        let result = orch
            .execute_agent_action(
                agent.id,
                "summarize_document",
                json!({ "content": text }).as_object().cloned().unwrap(),
            )
            .await
            .unwrap();
        assert!(result.success);

        let entry = orch.audit_ledger().get(result.audit_id.unwrap()).unwrap();
        assert_eq!(entry.action_type, "summarize_document");
        assert_eq!(entry.source_agent_id, agent.id);
        assert!(entry.status.is_approved());
        assert!(entry.outcome.unwrap().success);
    }
    assert_eq!(orch.audit_ledger().for_agent(agent.id).len(), 2);
}

#[tokio::test]
async fn test_confirmation_gate_never_performs() {
    let (orch, provider) = make_orchestrator(test_config(), StaticProvider::default());
    let agent = orch
        .create_agent(
            AgentSpec::new("Outbox", AgentKind::Email, ["send_email"]).with_confirmation(true),
        )
        .unwrap();

    let params = json!({ "to": "team@example.com" }).as_object().cloned().unwrap();
    let result = orch
        .execute_agent_action(agent.id, "send_email", params)
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.is_none());
    assert_eq!(provider.call_count(), 0);

    let pending_id = result.pending_audit_id.unwrap();
    assert_eq!(orch.audit_ledger().pending().len(), 1);
    let approved = orch.audit_ledger().approve(pending_id).unwrap();
    assert_eq!(approved.status, AuditStatus::Approved);
    assert!(orch.audit_ledger().pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_decays_after_window() {
    let mut config = test_config();
    config.rate_limit.max_requests = 2;
    config.rate_limit.window_secs = 60;
    let (orch, _) = make_orchestrator(config, StaticProvider::default());
    let agent = orch
        .create_agent(AgentSpec::new("Tasks", AgentKind::Task, ["add_todo"]))
        .unwrap();

    let run = || orch.execute_agent_action(agent.id, "add_todo", Map::new());
    assert!(run().await.unwrap().success);
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(run().await.unwrap().success);

    let limited = run().await.unwrap();
    assert!(!limited.success);
    assert!(limited.retryable);

    // The first request leaves the window; the second is still counted.
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(run().await.unwrap().success);
    assert!(!run().await.unwrap().success);
}

#[tokio::test(start_paused = true)]
async fn test_queue_retries_then_drops() {
    let (orch, provider) = make_orchestrator(
        test_config(),
        StaticProvider::failing(ActionError::Provider("503".into())),
    );
    let agent = orch
        .create_agent(AgentSpec::new("Flows", AgentKind::Workflow, ["sync_crm"]))
        .unwrap();

    let retried = collect(&orch, EventKind::ActionRetried, |e| match e {
        DomainEvent::ActionRetried { priority, .. } => Some(*priority),
        _ => None,
    });
    let dropped = collect(&orch, EventKind::ActionDropped, |e| match e {
        DomainEvent::ActionDropped { retry_count, .. } => Some(*retry_count),
        _ => None,
    });

    orch.enqueue_action(agent.id, ActionRequest::new("sync_crm", Map::new()), Some(1))
        .unwrap();
    orch.queue().wait_idle().await;

    assert_eq!(provider.call_count(), 4);
    assert_eq!(*retried.lock().unwrap(), vec![0, -1, -2]);
    assert_eq!(*dropped.lock().unwrap(), vec![3]);
    assert!(orch.queue().is_empty());

    let metrics = orch.get_agent_metrics(agent.id).unwrap();
    assert_eq!(metrics.total_executions, 4);
    assert_eq!(metrics.success_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_queue_waits_out_rate_limit_instead_of_dropping() {
    let mut config = test_config();
    config.rate_limit.max_requests = 2;
    config.rate_limit.window_secs = 60;
    let (orch, provider) = make_orchestrator(config, StaticProvider::new("Archived"));
    let agent = orch
        .create_agent(AgentSpec::new("Inbox", AgentKind::Email, ["archive_email"]))
        .unwrap();
    let dropped = collect(&orch, EventKind::ActionDropped, |e| match e {
        DomainEvent::ActionDropped { .. } => Some(()),
        _ => None,
    });

    let started = tokio::time::Instant::now();
    for _ in 0..3 {
        orch.enqueue_action(agent.id, ActionRequest::new("archive_email", Map::new()), None)
            .unwrap();
    }
    orch.queue().wait_idle().await;

    let results = orch.get_agent_results(agent.id);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(provider.call_count(), 3);
    assert!(dropped.lock().unwrap().is_empty());
    assert!(orch
        .audit_ledger()
        .entries()
        .iter()
        .all(|e| e.status != AuditStatus::Rejected));
    assert!(started.elapsed() >= Duration::from_secs(60));
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_state_survives_restart() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(StaticProvider::default());

    let first = Orchestrator::new(test_config(), provider.clone(), store.clone());
    record_from_users(&first, "archive_email", &["alice", "bob", "carol"]);
    let agent = first
        .create_agent(AgentSpec::new("Inbox", AgentKind::Email, ["archive_email"]))
        .unwrap();
    first.set_agent_status(agent.id, AgentStatus::Inactive).unwrap();
    first.persist_state().unwrap();

    let second = Orchestrator::new(test_config(), provider, store);
    assert_eq!(second.restore_state().unwrap(), 1);
    assert_eq!(second.get_agent(agent.id).unwrap().status, AgentStatus::Inactive);
    assert!(second.get_active_agents().is_empty());
    assert_eq!(second.get_suggestions().len(), 1);
}
