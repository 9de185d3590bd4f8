//! CLI argument definitions for the Cadence binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Cadence - learns recurring workflows and runs agents for them.
#[derive(Parser, Debug)]
#[command(name = "cadence", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the state database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Write the default configuration to the config path.
    InitConfig,

    /// Feed a JSON-lines file of user actions to the pattern learner.
    Replay {
        /// One action per line: {"type": ..., "user_id": ..., "payload": {...}}.
        file: PathBuf,

        /// Create an agent for every resulting suggestion.
        #[arg(long = "create-agents")]
        create_agents: bool,
    },

    /// Register an agent by hand.
    CreateAgent {
        #[arg(long)]
        name: String,

        /// email, calendar, document, task or workflow.
        #[arg(long)]
        kind: String,

        /// Action type the agent may perform. Repeatable.
        #[arg(long = "capability", required = true)]
        capabilities: Vec<String>,

        /// Defer every action to external confirmation.
        #[arg(long)]
        confirm: bool,
    },

    /// List registered agents with their metrics.
    Agents,

    /// Run one action on an agent.
    Execute {
        #[arg(long)]
        agent: Uuid,

        #[arg(long)]
        action: String,

        /// JSON object of action parameters.
        #[arg(long)]
        params: Option<String>,
    },

    /// Keep running, re-analysing patterns on the configured interval.
    Watch {
        /// Overrides the configured analysis interval.
        #[arg(long = "interval-secs")]
        interval_secs: Option<u64>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CADENCE_CONFIG env var > ~/.cadence/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CADENCE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// `None` means the config file value applies.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Filter directive for the tracing subscriber.
    ///
    /// Priority: --log-level flag > RUST_LOG > config file value.
    pub fn resolve_log_filter(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        std::env::var("RUST_LOG").unwrap_or_else(|_| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".cadence").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".cadence").join("config.toml");
    }
    PathBuf::from("config.toml")
}
