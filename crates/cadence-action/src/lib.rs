//! Agent execution engine for Cadence.
//!
//! Registers agents, routes actions to them through validation, capability,
//! rate-limit and audit gates, and drains a retrying priority queue.

pub mod agent;
pub mod analysis;
pub mod audit;
pub mod backoff;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod queue;
pub mod rate_limit;
pub mod types;

pub use agent::{build_behavior, parse_agent_kind, Agent, AgentBehavior, AgentContext, AgentServices};
pub use analysis::PatternAnalysisScheduler;
pub use audit::{AuditEntry, AuditLedger, AuditOutcome};
pub use backoff::{BackoffExecutor, BackoffPolicy};
pub use error::{ActionError, AuditError};
pub use orchestrator::Orchestrator;
pub use provider::{CompletionOptions, CompletionProvider, StaticProvider};
pub use queue::{ActionQueue, QueueItem};
pub use rate_limit::RateLimiter;
pub use types::{
    ActionResult, AgentConfigUpdate, AgentDescriptor, AgentMetrics, AgentSpec, AgentStatus,
    AuditStatus, AutonomyLevel, TrainingReport,
};
