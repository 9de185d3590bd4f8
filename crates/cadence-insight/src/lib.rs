//! Cadence Insight crate - workflow pattern learning.
//!
//! Observes the stream of user actions and turns it into:
//! - Recurring workflow patterns with frequency and confidence
//! - Automation suggestions for patterns that cross the thresholds
//! - Category classification of action types into agent kinds

pub mod classify;
pub mod error;
pub mod learner;
pub mod types;

pub use classify::ActionClassifier;
pub use error::InsightError;
pub use learner::{PatternLearner, PatternUpdate};
pub use types::{AgentSuggestion, PatternType, WorkflowPattern};
