//! Cadence application binary - composition root.
//!
//! 1. Parse CLI args and load configuration from TOML
//! 2. Open the SQLite state store and restore agents and patterns
//! 3. Run the requested command against the orchestrator
//! 4. Persist state before exiting

mod cli;
mod replay;
mod store;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cadence_action::{
    parse_agent_kind, AgentSpec, Orchestrator, PatternAnalysisScheduler, StaticProvider,
};
use cadence_core::{CadenceConfig, DomainEvent, EventKind, NoticeLevel};
use clap::Parser;
use serde_json::{json, Map, Value};

use crate::cli::{CliArgs, Command};
use crate::store::SqliteStore;

/// Reply used by the offline completion provider.
const OFFLINE_REPLY: &str = "Completed offline";

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_replay(
    orch: &Orchestrator,
    file: PathBuf,
    create_agents: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let actions = replay::read_actions(BufReader::new(File::open(&file)?))?;
    tracing::info!(path = %file.display(), count = actions.len(), "Replaying user actions");

    for action in actions {
        orch.record_action(action);
    }
    orch.analyze_patterns();

    let suggestions = orch.get_suggestions();
    print_json(&json!({
        "patterns": orch.get_patterns(),
        "suggestions": suggestions,
    }))?;

    if create_agents {
        for suggestion in &suggestions {
            let Some(pattern) = orch.get_pattern(suggestion.pattern_id) else {
                continue;
            };
            let already_covered = orch.get_agents().iter().any(|a| {
                a.preferences.get("pattern_id") == Some(&json!(pattern.id))
            });
            if already_covered {
                tracing::debug!(pattern_id = %pattern.id, "Pattern already has an agent");
                continue;
            }
            if let Some(agent) = orch.create_agent_from_pattern(&pattern).await {
                println!("created {} ({})", agent.name, agent.id);
            }
        }
    }
    Ok(())
}

fn run_create_agent(
    orch: &Orchestrator,
    name: String,
    kind: &str,
    capabilities: Vec<String>,
    confirm: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind = parse_agent_kind(kind)?;
    let descriptor =
        orch.create_agent(AgentSpec::new(name, kind, capabilities).with_confirmation(confirm))?;
    print_json(&descriptor)
}

fn run_list_agents(orch: &Orchestrator) -> Result<(), Box<dyn std::error::Error>> {
    let mut rows = Vec::new();
    for agent in orch.get_agents() {
        let metrics = orch.get_agent_metrics(agent.id)?;
        rows.push(json!({ "agent": agent, "metrics": metrics }));
    }
    print_json(&rows)
}

async fn run_execute(
    orch: &Orchestrator,
    agent_id: uuid::Uuid,
    action: &str,
    params: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let params: Map<String, Value> = match params {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Map::new(),
    };
    let result = orch.execute_agent_action(agent_id, action, params).await?;
    print_json(&result)
}

async fn run_watch(
    orch: Arc<Orchestrator>,
    interval_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = Arc::new(match interval_secs {
        Some(secs) => PatternAnalysisScheduler::with_interval(Arc::clone(&orch), Duration::from_secs(secs)),
        None => PatternAnalysisScheduler::new(Arc::clone(&orch)),
    });
    let runner = Arc::clone(&scheduler);
    let handle = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    scheduler.shutdown();
    handle.await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing starts so its log level can apply.
    let config_file = args.resolve_config_path();
    let config_exists = config_file.exists();
    let mut config = CadenceConfig::load_or_default(&config_file);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(args.resolve_log_filter(&config.general.log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Cadence v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), found = config_exists, "Configuration resolved");

    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    if args.command == Command::InitConfig {
        config.save(&config_file)?;
        println!("wrote {}", config_file.display());
        return Ok(());
    }

    // State store.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let store = Arc::new(SqliteStore::open(&data_dir.join("cadence.db"))?);

    let orch = Arc::new(Orchestrator::new(
        config,
        Arc::new(StaticProvider::new(OFFLINE_REPLY)),
        store,
    ));
    let restored = orch.restore_state()?;
    tracing::info!(agents = restored, "Orchestrator ready");

    // Surface user-facing notices in the log.
    let notices = orch.events().subscribe(EventKind::Notice, |event| {
        if let DomainEvent::Notice { level, message, .. } = event {
            match level {
                NoticeLevel::Info => tracing::info!("{}", message),
                NoticeLevel::Warning => tracing::warn!("{}", message),
                NoticeLevel::Error => tracing::error!("{}", message),
            }
        }
    });

    match args.command {
        Command::InitConfig => {}
        Command::Replay { file, create_agents } => run_replay(&orch, file, create_agents).await?,
        Command::CreateAgent {
            name,
            kind,
            capabilities,
            confirm,
        } => run_create_agent(&orch, name, &kind, capabilities, confirm)?,
        Command::Agents => run_list_agents(&orch)?,
        Command::Execute {
            agent,
            action,
            params,
        } => run_execute(&orch, agent, &action, params).await?,
        Command::Watch { interval_secs } => run_watch(Arc::clone(&orch), interval_secs).await?,
    }

    orch.persist_state()?;
    notices.unsubscribe();
    Ok(())
}
