use cadence_core::CadenceError;
use thiserror::Error;

/// Errors that can occur while persisting or restoring learned patterns.
#[derive(Error, Debug)]
pub enum InsightError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<CadenceError> for InsightError {
    fn from(err: CadenceError) -> Self {
        match err {
            CadenceError::Serialization(msg) => InsightError::Serialization(msg),
            other => InsightError::Storage(other.to_string()),
        }
    }
}
