//! Priority queue of pending agent actions.
//!
//! Items drain one at a time, highest priority first, oldest first among
//! equals. Items for an agent at its rate limit stay queued until the
//! window frees a slot. A retryable failure sends the item back with one
//! less priority point, so repeatedly failing work sinks below fresh work.
//! Terminal failures are dropped and reported through the event bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cadence_core::config::QueueConfig;
use cadence_core::{ActionRequest, DomainEvent, EventBus, Timestamp};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::agent::Agent;
use crate::types::ActionResult;

/// Receives every result produced by a drain, keyed by agent id.
pub type ResultSink = Arc<dyn Fn(Uuid, &ActionResult) + Send + Sync>;

/// A queued request. Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: Uuid,
    pub action: ActionRequest,
    pub agent_id: Uuid,
    pub priority: i32,
    pub retry_count: u32,
    pub enqueued_at: Timestamp,
}

struct Entry {
    item: QueueItem,
    agent: Arc<Agent>,
}

struct QueueInner {
    items: Mutex<Vec<Entry>>,
    processing: AtomicBool,
    idle: Notify,
    max_retries: u32,
    drain_delay: Duration,
    events: EventBus,
    sink: Option<ResultSink>,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct ActionQueue {
    inner: Arc<QueueInner>,
}

impl ActionQueue {
    pub fn new(config: &QueueConfig, events: EventBus, sink: Option<ResultSink>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(Vec::new()),
                processing: AtomicBool::new(false),
                idle: Notify::new(),
                max_retries: config.max_retries,
                drain_delay: Duration::from_millis(config.drain_delay_ms),
                events,
                sink,
            }),
        }
    }

    /// Append a request and start draining if the queue is idle.
    ///
    /// Draining needs a tokio runtime. Without one the item stays queued
    /// until the next call made from inside a runtime.
    pub fn add_to_queue(&self, agent: Arc<Agent>, action: ActionRequest, priority: i32) -> Uuid {
        let item = QueueItem {
            id: Uuid::new_v4(),
            agent_id: agent.id(),
            action,
            priority,
            retry_count: 0,
            enqueued_at: Timestamp::now(),
        };
        let id = item.id;

        tracing::debug!(
            agent_id = %item.agent_id,
            action_type = %item.action.action_type,
            priority,
            "Action queued"
        );
        self.inner.events.emit(DomainEvent::ActionQueued {
            agent_id: item.agent_id,
            action_type: item.action.action_type.clone(),
            priority,
            timestamp: Timestamp::now(),
        });

        let mut items = self.inner.lock();
        items.push(Entry { item, agent });
        if !self.inner.processing.swap(true, Ordering::SeqCst) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(drain(Arc::clone(&self.inner)));
                }
                Err(_) => {
                    self.inner.processing.store(false, Ordering::SeqCst);
                    tracing::warn!("No async runtime; queued action will wait for the next enqueue");
                }
            }
        }
        id
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    /// Items currently waiting, in drain order.
    pub fn snapshot(&self) -> Vec<QueueItem> {
        let items = self.inner.lock();
        let mut snapshot: Vec<QueueItem> = items.iter().map(|e| e.item.clone()).collect();
        snapshot.sort_by(|a, b| b.priority.cmp(&a.priority));
        snapshot
    }

    /// Resolve once the queue is empty and no drain is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_processing() && self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// What the drain loop should do next.
enum Next {
    Run(Entry),
    Wait(Duration),
    Done,
}

/// Take the best item whose agent has rate-limit capacity.
///
/// When every waiting agent is at its limit, reports the shortest wait
/// instead so no attempt is spent on a request that would be rejected.
fn next_entry(inner: &QueueInner) -> Next {
    let mut items = inner.lock();
    if items.is_empty() {
        // Cleared under the lock so a concurrent add sees a consistent flag.
        inner.processing.store(false, Ordering::SeqCst);
        return Next::Done;
    }
    // Stable, so equal priorities keep insertion order.
    items.sort_by(|a, b| b.item.priority.cmp(&a.item.priority));

    let mut shortest: Option<Duration> = None;
    for index in 0..items.len() {
        match items[index].agent.rate_limit_wait() {
            None => return Next::Run(items.remove(index)),
            Some(wait) => shortest = Some(shortest.map_or(wait, |s| s.min(wait))),
        }
    }
    Next::Wait(shortest.unwrap_or(inner.drain_delay))
}

async fn drain(inner: Arc<QueueInner>) {
    loop {
        let entry = match next_entry(&inner) {
            Next::Run(entry) => entry,
            Next::Wait(wait) => {
                tracing::debug!(
                    waiting = inner.lock().len(),
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "All queued agents rate limited, pausing drain"
                );
                tokio::time::sleep(wait).await;
                continue;
            }
            Next::Done => break,
        };

        let Entry { mut item, agent } = entry;
        let result = agent.execute_action(&item.action).await;
        if let Some(sink) = &inner.sink {
            sink(item.agent_id, &result);
        }

        if result.success || result.is_pending() {
            tracing::debug!(
                agent_id = %item.agent_id,
                action_type = %item.action.action_type,
                pending = result.is_pending(),
                "Queued action finished"
            );
        } else if result.retryable && item.retry_count < inner.max_retries {
            item.retry_count += 1;
            item.priority -= 1;
            tracing::info!(
                agent_id = %item.agent_id,
                action_type = %item.action.action_type,
                retry_count = item.retry_count,
                priority = item.priority,
                "Queued action failed, retrying"
            );
            inner.events.emit(DomainEvent::ActionRetried {
                agent_id: item.agent_id,
                action_type: item.action.action_type.clone(),
                retry_count: item.retry_count,
                priority: item.priority,
                timestamp: Timestamp::now(),
            });
            inner.lock().push(Entry { item, agent });
        } else {
            let reason = result
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            tracing::warn!(
                agent_id = %item.agent_id,
                action_type = %item.action.action_type,
                retry_count = item.retry_count,
                error = %reason,
                "Queued action dropped"
            );
            inner.events.emit(DomainEvent::ActionDropped {
                agent_id: item.agent_id,
                action_type: item.action.action_type.clone(),
                retry_count: item.retry_count,
                reason,
                timestamp: Timestamp::now(),
            });
        }

        tokio::time::sleep(inner.drain_delay).await;
    }
    inner.idle.notify_waiters();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{descriptor, ProbeBehavior};
    use crate::agent::AgentServices;
    use crate::error::ActionError;
    use cadence_core::{AgentKind, EventKind};
    use serde_json::Map;
    use std::sync::atomic::AtomicUsize;

    fn agent_with(
        services: &AgentServices,
        fail_with: Option<ActionError>,
    ) -> (Arc<Agent>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let agent = Agent::new(
            descriptor(AgentKind::Workflow, &["sync_crm", "export_report"]),
            Box::new(ProbeBehavior {
                calls: Arc::clone(&calls),
                fail_with,
            }),
            services.clone(),
        );
        (Arc::new(agent), calls)
    }

    fn request(action_type: &str) -> ActionRequest {
        ActionRequest::new(action_type, Map::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_action_retries_then_drops() {
        let services = AgentServices::default();
        let (agent, calls) = agent_with(&services, Some(ActionError::Provider("503".into())));
        let retries = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&retries);
        let _sub = services.events.subscribe(EventKind::ActionRetried, move |e| {
            if let DomainEvent::ActionRetried { priority, .. } = e {
                sink.lock().unwrap().push(*priority);
            }
        });

        let queue = ActionQueue::new(&QueueConfig::default(), services.events.clone(), None);
        queue.add_to_queue(agent, request("sync_crm"), 1);
        queue.wait_idle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(*retries.lock().unwrap(), vec![0, -1, -2]);
        assert!(queue.is_empty());
        assert!(!queue.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_dropped_immediately() {
        let services = AgentServices::default();
        let (agent, calls) = agent_with(&services, None);
        let dropped = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dropped);
        let _sub = services.events.subscribe(EventKind::ActionDropped, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let queue = ActionQueue::new(&QueueConfig::default(), services.events.clone(), None);
        // Not in the agent's capability set.
        queue.add_to_queue(agent, request("delete_everything"), 1);
        queue.wait_idle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_by_priority_then_insertion() {
        let services = AgentServices::default();
        let (agent, _) = agent_with(&services, None);
        let order = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&order);
        let sink: ResultSink = Arc::new(move |_: Uuid, result: &ActionResult| {
            let label = result.action.param_str("label").unwrap_or_default().to_string();
            record.lock().unwrap().push(label);
        });
        let queue = ActionQueue::new(&QueueConfig::default(), services.events.clone(), Some(sink));

        let labelled = |label: &str| {
            ActionRequest::from_json("sync_crm", serde_json::json!({ "label": label }))
        };
        // Nothing drains until the test yields, so all four are sorted together.
        queue.add_to_queue(Arc::clone(&agent), labelled("first"), 1);
        queue.add_to_queue(Arc::clone(&agent), labelled("low"), 0);
        queue.add_to_queue(Arc::clone(&agent), labelled("high-a"), 5);
        queue.add_to_queue(Arc::clone(&agent), labelled("high-b"), 5);
        queue.wait_idle().await;

        assert_eq!(*order.lock().unwrap(), vec!["high-a", "high-b", "first", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_orders_by_priority() {
        let services = AgentServices::default();
        let (agent, _) = agent_with(&services, None);
        let queue = ActionQueue::new(&QueueConfig::default(), services.events.clone(), None);

        queue.add_to_queue(Arc::clone(&agent), request("sync_crm"), 1);
        queue.add_to_queue(Arc::clone(&agent), request("export_report"), 3);
        queue.add_to_queue(Arc::clone(&agent), request("sync_crm"), 2);

        // The drain task has not been polled yet.
        let snapshot = queue.snapshot();
        let priorities: Vec<i32> = snapshot.iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![3, 2, 1]);
        assert!(queue.is_processing());

        queue.wait_idle().await;
        assert!(queue.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_agent_keeps_items_queued() {
        let services = AgentServices {
            rate_limiter: Arc::new(crate::rate_limit::RateLimiter::new(2, Duration::from_secs(60))),
            ..AgentServices::default()
        };
        let (limited, limited_calls) = agent_with(&services, None);
        let (other, other_calls) = agent_with(&services, None);
        let retried = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&retried);
        let _sub = services.events.subscribe(EventKind::ActionRetried, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let queue = ActionQueue::new(&QueueConfig::default(), services.events.clone(), None);
        for _ in 0..3 {
            queue.add_to_queue(Arc::clone(&limited), request("sync_crm"), 5);
        }
        queue.add_to_queue(other, request("sync_crm"), 0);

        // Two run at once; the third waits for the window while the
        // lower-priority item for the other agent goes ahead.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(limited_calls.load(Ordering::SeqCst), 2);
        assert_eq!(other_calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 1);

        let started = tokio::time::Instant::now();
        queue.wait_idle().await;
        assert_eq!(limited_calls.load(Ordering::SeqCst), 3);
        assert_eq!(retried.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() >= Duration::from_secs(58));
    }

    #[test]
    fn test_enqueue_without_runtime_keeps_item() {
        let services = AgentServices::default();
        let (agent, _) = agent_with(&services, None);
        let queue = ActionQueue::new(&QueueConfig::default(), services.events.clone(), None);
        queue.add_to_queue(agent, request("sync_crm"), 1);
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_processing());
    }
}
