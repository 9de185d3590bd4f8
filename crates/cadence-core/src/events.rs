use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Timestamp;

/// Severity of a user-facing notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Lifecycle events emitted by the orchestration core.
///
/// Events are consumed by in-process subscribers only:
/// - the host UI (status indicators, notices)
/// - tests asserting ordering and retry behaviour
/// - logging adapters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DomainEvent {
    // =========================================================================
    // Action Lifecycle Events
    // =========================================================================
    /// An agent began performing an action.
    ActionStarted {
        agent_id: Uuid,
        action_type: String,
        timestamp: Timestamp,
    },

    /// An action finished successfully.
    ActionCompleted {
        agent_id: Uuid,
        action_type: String,
        audit_id: Uuid,
        duration_ms: u64,
        timestamp: Timestamp,
    },

    /// An action was rejected or its execution failed.
    ActionFailed {
        agent_id: Uuid,
        action_type: String,
        error: String,
        retryable: bool,
        timestamp: Timestamp,
    },

    /// An action is waiting for external confirmation.
    ActionDeferred {
        agent_id: Uuid,
        action_type: String,
        audit_id: Uuid,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Queue Events
    // =========================================================================
    /// An action was added to the queue.
    ActionQueued {
        agent_id: Uuid,
        action_type: String,
        priority: i32,
        timestamp: Timestamp,
    },

    /// A failed queued action was re-queued with a lower priority.
    ActionRetried {
        agent_id: Uuid,
        action_type: String,
        retry_count: u32,
        priority: i32,
        timestamp: Timestamp,
    },

    /// A queued action failed terminally and was removed.
    ActionDropped {
        agent_id: Uuid,
        action_type: String,
        retry_count: u32,
        reason: String,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Agent Events
    // =========================================================================
    /// A new agent was registered.
    AgentCreated {
        agent_id: Uuid,
        name: String,
        kind: String,
        timestamp: Timestamp,
    },

    /// An agent moved between active, inactive and training.
    AgentStatusChanged {
        agent_id: Uuid,
        status: String,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Learning Events
    // =========================================================================
    /// A new workflow pattern was detected.
    PatternDetected {
        pattern_id: Uuid,
        action_type: String,
        frequency: u32,
        timestamp: Timestamp,
    },

    /// The set of automation suggestions changed.
    SuggestionsUpdated { count: usize, timestamp: Timestamp },

    /// A human-readable notice for the user.
    Notice {
        level: NoticeLevel,
        message: String,
        timestamp: Timestamp,
    },
}

/// Discriminant of [`DomainEvent`], used as the subscription key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ActionStarted,
    ActionCompleted,
    ActionFailed,
    ActionDeferred,
    ActionQueued,
    ActionRetried,
    ActionDropped,
    AgentCreated,
    AgentStatusChanged,
    PatternDetected,
    SuggestionsUpdated,
    Notice,
}

impl DomainEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            DomainEvent::ActionStarted { timestamp, .. }
            | DomainEvent::ActionCompleted { timestamp, .. }
            | DomainEvent::ActionFailed { timestamp, .. }
            | DomainEvent::ActionDeferred { timestamp, .. }
            | DomainEvent::ActionQueued { timestamp, .. }
            | DomainEvent::ActionRetried { timestamp, .. }
            | DomainEvent::ActionDropped { timestamp, .. }
            | DomainEvent::AgentCreated { timestamp, .. }
            | DomainEvent::AgentStatusChanged { timestamp, .. }
            | DomainEvent::PatternDetected { timestamp, .. }
            | DomainEvent::SuggestionsUpdated { timestamp, .. }
            | DomainEvent::Notice { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::ActionStarted { .. } => EventKind::ActionStarted,
            DomainEvent::ActionCompleted { .. } => EventKind::ActionCompleted,
            DomainEvent::ActionFailed { .. } => EventKind::ActionFailed,
            DomainEvent::ActionDeferred { .. } => EventKind::ActionDeferred,
            DomainEvent::ActionQueued { .. } => EventKind::ActionQueued,
            DomainEvent::ActionRetried { .. } => EventKind::ActionRetried,
            DomainEvent::ActionDropped { .. } => EventKind::ActionDropped,
            DomainEvent::AgentCreated { .. } => EventKind::AgentCreated,
            DomainEvent::AgentStatusChanged { .. } => EventKind::AgentStatusChanged,
            DomainEvent::PatternDetected { .. } => EventKind::PatternDetected,
            DomainEvent::SuggestionsUpdated { .. } => EventKind::SuggestionsUpdated,
            DomainEvent::Notice { .. } => EventKind::Notice,
        }
    }

    /// Returns a human-readable event name for logging.
    pub fn event_name(&self) -> &'static str {
        match self.kind() {
            EventKind::ActionStarted => "action_started",
            EventKind::ActionCompleted => "action_completed",
            EventKind::ActionFailed => "action_failed",
            EventKind::ActionDeferred => "action_deferred",
            EventKind::ActionQueued => "action_queued",
            EventKind::ActionRetried => "action_retried",
            EventKind::ActionDropped => "action_dropped",
            EventKind::AgentCreated => "agent_created",
            EventKind::AgentStatusChanged => "agent_status_changed",
            EventKind::PatternDetected => "pattern_detected",
            EventKind::SuggestionsUpdated => "suggestions_updated",
            EventKind::Notice => "notice",
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

type Handler = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

struct Registered {
    id: u64,
    kind: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: RwLock<Vec<Registered>>,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut handlers = match self.handlers.write() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }
}

/// Synchronous publish/subscribe hub for [`DomainEvent`]s.
///
/// Handlers run on the emitting thread. A panicking handler is logged and
/// skipped; the remaining handlers still receive the event. Cloning the bus
/// yields another handle to the same subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle returned by [`EventBus::subscribe`].
///
/// The handler stays registered until [`Subscription::unsubscribe`] is called;
/// dropping the handle does not remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the handler. Returns `false` if it was already removed or the
    /// bus no longer exists.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.remove(self.id),
            None => false,
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one kind of event.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register a handler for every event.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = match self.inner.handlers.write() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.push(Registered { id, kind, handler });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every current subscriber of its kind.
    pub fn emit(&self, event: DomainEvent) {
        let kind = event.kind();
        // Snapshot so handlers may subscribe/unsubscribe without deadlocking.
        let targets: Vec<Handler> = {
            let handlers = match self.inner.handlers.read() {
                Ok(h) => h,
                Err(poisoned) => poisoned.into_inner(),
            };
            handlers
                .iter()
                .filter(|r| r.kind.map_or(true, |k| k == kind))
                .map(|r| Arc::clone(&r.handler))
                .collect()
        };

        tracing::trace!(event = event.event_name(), subscribers = targets.len(), "Emitting event");

        for handler in targets {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::error!(event = event.event_name(), "Event handler panicked");
            }
        }
    }

    /// Number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        match self.inner.handlers.read() {
            Ok(h) => h.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
