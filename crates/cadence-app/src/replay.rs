//! JSON-lines action log reader.

use std::io::BufRead;

use cadence_core::{Timestamp, UserAction};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// One log line. The timestamp defaults to the time of reading.
#[derive(Deserialize)]
struct ReplayRecord {
    #[serde(rename = "type")]
    action_type: String,
    user_id: String,
    #[serde(default)]
    payload: Map<String, Value>,
    #[serde(default)]
    timestamp: Option<Timestamp>,
}

/// Read user actions, skipping blank lines and `#` comments.
pub fn read_actions<R: BufRead>(reader: R) -> Result<Vec<UserAction>, ReplayError> {
    let mut actions = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: ReplayRecord =
            serde_json::from_str(trimmed).map_err(|e| ReplayError::Parse {
                line: index + 1,
                message: e.to_string(),
            })?;

        let mut action = UserAction::new(record.action_type, record.user_id).with_payload(record.payload);
        if let Some(ts) = record.timestamp {
            action.timestamp = ts;
        }
        actions.push(action);
    }
    Ok(actions)
}
