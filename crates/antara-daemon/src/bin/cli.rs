//! Antara CLI
//!
//! A thin operator shell over the cognitive-memory core: status, session
//! listing, and the explicit-memory grammar. Full interactive CLI
//! ergonomics are out of scope for this core; this binary is deliberately
//! small.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use antara_core::config::DaemonConfig;
use antara_core::nidra::Nidra;
use antara_core::recall::RecallEngine;
use antara_core::store::SessionStore;
use antara_core::MemoryBridge;

#[derive(Parser)]
#[command(name = "antara")]
#[command(author = "Antara Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for the Antara cognitive-memory daemon")]
struct Cli {
    /// Path to config.toml (default: <home>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status: home directory, sleep state, session counts
    Status,

    /// List recent sessions
    Sessions {
        /// Restrict to a single project path
        #[arg(long)]
        project: Option<String>,
        /// Maximum number of sessions to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Explicit-memory grammar: remember/forget/recall/list
    Memory {
        /// e.g. "remember the user prefers tabs", "recall tabs", "list"
        text: Vec<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<DaemonConfig> {
    DaemonConfig::load(path.map(|p| p.as_path())).map_err(|e| anyhow::anyhow!("failed to load config: {e}"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let home = config.effective_home().map_err(|e| anyhow::anyhow!("{e}"))?;

    match cli.command {
        Commands::Status => run_status(&config, &home),
        Commands::Sessions { project, limit } => run_sessions(&home, project, limit),
        Commands::Memory { text } => run_memory(&home, &config, text.join(" ")),
        Commands::Config => run_config(&config),
    }
}

fn run_status(config: &DaemonConfig, home: &std::path::Path) -> anyhow::Result<()> {
    println!("{}", "=== Antara Status ===".cyan().bold());
    println!();
    println!("{}: {}", "Home".white().bold(), home.display());

    let store = SessionStore::open(home)?;
    let nidra = Nidra::restore(store.storage(), config.nidra.idle_threshold_secs, config.nidra.heartbeat_interval_secs)?;
    println!("{}: {}", "Sleep state".white().bold(), nidra.state().as_str());

    let sessions = store.list_sessions(None)?;
    println!("{}: {}", "Total sessions".white().bold(), sessions.len());
    let total_turns: u64 = sessions.iter().map(|s| s.turn_count as u64).sum();
    println!("{}: {}", "Total turns".white().bold(), total_turns);

    if let Some(last) = nidra.last_consolidation_end() {
        println!("{}: {}", "Last consolidation".white().bold(), last.format("%Y-%m-%d %H:%M:%S UTC"));
    } else {
        println!("{}: {}", "Last consolidation".white().bold(), "never".dimmed());
    }

    Ok(())
}

fn run_sessions(home: &std::path::Path, project: Option<String>, limit: usize) -> anyhow::Result<()> {
    let store = SessionStore::open(home)?;
    let mut sessions = store.list_sessions(project.as_deref())?;
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    sessions.truncate(limit);

    println!("{}", "=== Sessions ===".cyan().bold());
    println!();
    if sessions.is_empty() {
        println!("{}", "No sessions found.".dimmed());
        return Ok(());
    }
    for meta in &sessions {
        println!(
            "  {} [{}] {} turns  {}",
            meta.id[..8].yellow(),
            meta.agent_id,
            meta.turn_count,
            meta.title.as_deref().unwrap_or("(untitled)").dimmed()
        );
    }
    Ok(())
}

fn run_memory(home: &std::path::Path, config: &DaemonConfig, text: String) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("usage: antara memory <remember|forget|recall|list> ...");
    }
    let store = Arc::new(SessionStore::open(home)?);
    let recall = Arc::new(RecallEngine::new(config.recall.clone()));
    let bridge = MemoryBridge::new(store, recall);

    match bridge.handle_memory_command(&text, None) {
        Some(response) => println!("{response}"),
        None => println!("{}", "Not a recognized memory command (remember/forget/recall/list).".yellow()),
    }
    Ok(())
}

fn run_config(config: &DaemonConfig) -> anyhow::Result<()> {
    println!("{}", "=== Antara Configuration ===".cyan().bold());
    println!();
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
