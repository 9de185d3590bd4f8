use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CadenceError, Result};

/// Top-level configuration for the Cadence orchestration core.
///
/// Loaded from `~/.cadence/config.toml` by default. Each section corresponds
/// to one component of the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub learner: LearnerConfig,
    #[serde(default)]
    pub agents: AgentDefaultsConfig,
}

impl CadenceConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CadenceConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CadenceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Directory for host-side state snapshots.
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: "~/.cadence/data".to_string(),
        }
    }
}

/// Action queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Retries allowed per queued action before it is dropped.
    pub max_retries: u32,
    /// Delay between drained items in milliseconds.
    pub drain_delay_ms: u64,
    /// Priority used when a caller does not specify one.
    pub default_priority: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            drain_delay_ms: 100,
            default_priority: 1,
        }
    }
}

/// Per-agent rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per agent inside one window.
    pub max_requests: u32,
    /// Sliding window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
        }
    }
}

/// Timeout and retry policy for completion-provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Base timeout for the first attempt in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub retries: u32,
    /// Growth factor applied to both the wait and the next attempt's timeout.
    pub backoff_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 3,
            backoff_factor: 1.5,
        }
    }
}

/// Workflow pattern learning thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Similar actions (excluding the trigger) needed to create a pattern.
    pub min_similar_actions: usize,
    /// Group size needed by full reclustering to create a pattern.
    pub analyze_min_group: usize,
    /// Most-recent actions retained per pattern.
    pub action_window: usize,
    /// Confidence assigned to newly created patterns.
    pub seed_confidence: f64,
    /// Minimum frequency for a pattern to be suggested.
    pub suggest_min_frequency: u32,
    /// Confidence a pattern must exceed to be suggested.
    pub suggest_min_confidence: f64,
    /// Seconds between background full reclustering runs.
    pub analysis_interval_secs: u64,
    /// Most-recent user actions kept when the history is persisted.
    pub history_limit: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            min_similar_actions: 2,
            analyze_min_group: 3,
            action_window: 5,
            seed_confidence: 0.7,
            suggest_min_frequency: 3,
            suggest_min_confidence: 0.6,
            analysis_interval_secs: 3600,
            history_limit: 1000,
        }
    }
}

/// Defaults applied to newly created agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaultsConfig {
    /// Whether new agents defer every action to external confirmation.
    pub require_confirmation: bool,
    /// Autonomy level: "supervised", "autonomous" or "manual".
    pub default_autonomy: String,
}

impl Default for AgentDefaultsConfig {
    fn default() -> Self {
        Self {
            require_confirmation: false,
            default_autonomy: "supervised".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = CadenceConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.drain_delay_ms, 100);
        assert_eq!(config.queue.default_priority, 1);
        assert_eq!(config.rate_limit.max_requests, 60);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.backoff.timeout_ms, 30_000);
        assert_eq!(config.backoff.retries, 3);
        assert!((config.backoff.backoff_factor - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.learner.action_window, 5);
        assert!((config.learner.seed_confidence - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.learner.analysis_interval_secs, 3600);
        assert_eq!(config.learner.history_limit, 1000);
        assert_eq!(config.agents.default_autonomy, "supervised");
        assert!(!config.agents.require_confirmation);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"

[queue]
max_retries = 5
drain_delay_ms = 10

[rate_limit]
max_requests = 120
window_secs = 30

[learner]
suggest_min_frequency = 4
"#;
        let file = create_temp_config(content);
        let config = CadenceConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.queue.drain_delay_ms, 10);
        // Unspecified field in a present section falls back to default
        assert_eq!(config.queue.default_priority, 1);
        assert_eq!(config.rate_limit.max_requests, 120);
        assert_eq!(config.rate_limit.window_secs, 30);
        assert_eq!(config.learner.suggest_min_frequency, 4);
        assert_eq!(config.learner.action_window, 5);
    }

    #[test]
    fn test_load_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = CadenceConfig::load(file.path()).unwrap();
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.backoff.retries, 3);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        let result = CadenceConfig::load(file.path());
        assert!(matches!(result, Err(CadenceError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = CadenceConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.rate_limit.max_requests, 60);
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = CadenceConfig::default();
        config.queue.max_retries = 7;
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = CadenceConfig::load(&path).unwrap();
        assert_eq!(reloaded.queue.max_retries, 7);
        assert_eq!(reloaded.learner.action_window, config.learner.action_window);
    }
}
