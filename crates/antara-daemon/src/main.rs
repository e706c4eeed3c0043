//! Antara daemon
//!
//! The always-on background process that wires the cognitive-memory core
//! together: durable session storage, hybrid recall, sleep-inspired
//! consolidation (Nidra/Chitragupta), policy-gated capability orchestration,
//! and the Chetana self-model. It carries no transport of its own — the
//! wire protocol between this daemon and agent front-ends, and between this
//! daemon and any MCP servers it orchestrates, is out of scope and lives
//! behind `antara_core::CapabilityTransport` for callers who embed it.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use antara_core::capability::{AutonomousManager, ServerRegistry};
use antara_core::chetana::ChetanaController;
use antara_core::config::DaemonConfig;
use antara_core::dharma::{ApprovalGate, PolicyEngine};
use antara_core::jobs::JobQueue;
use antara_core::nidra::{Chitragupta, Nidra};
use antara_core::recall::RecallEngine;
use antara_core::store::{SessionStore, Storage};
use antara_core::{MemoryBridge, VERSION};

struct CliArgs {
    config: Option<PathBuf>,
    home: Option<PathBuf>,
}

/// Minimal hand-rolled parser, matching the teacher's preference for a
/// dependency-free `--help`/`--version` path that works before logging (and
/// any config loading) is set up.
fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config = None;
    let mut home = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("antara-daemon v{VERSION}");
                println!();
                println!("Background cognitive-memory orchestration core for an AI coding assistant.");
                println!();
                println!("USAGE:");
                println!("    antara-daemon [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --config <PATH>         Path to config.toml (default: <home>/config.toml)");
                println!("    --home <PATH>           Override the antara home directory");
                println!();
                println!("ENVIRONMENT:");
                println!("    ANTARA_HOME             Home directory override");
                println!("    ANTARA_LOG_LEVEL        Log level filter (e.g. debug, info, warn, error)");
                println!("    RUST_LOG                Overrides ANTARA_LOG_LEVEL if set");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("antara-daemon {VERSION}");
                std::process::exit(0);
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --config requires a path argument");
                    std::process::exit(1);
                }
                config = Some(PathBuf::from(&args[i]));
            }
            "--home" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --home requires a path argument");
                    std::process::exit(1);
                }
                home = Some(PathBuf::from(&args[i]));
            }
            arg => {
                eprintln!("error: unknown argument '{arg}'");
                eprintln!("Try 'antara-daemon --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    CliArgs { config, home }
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    let mut config = match DaemonConfig::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: failed to load config: {e}");
            std::process::exit(1);
        }
    };
    if let Some(home) = args.home {
        config.home = Some(home);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("antara daemon v{VERSION} starting");

    let home = match config.effective_home() {
        Ok(h) => h,
        Err(e) => {
            error!("failed to resolve home directory: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = std::fs::create_dir_all(&home) {
        error!("failed to create home directory {}: {e}", home.display());
        std::process::exit(1);
    }
    info!(home = %home.display(), "home directory resolved");

    let session_store = match SessionStore::open(&home) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to open session store: {e}");
            std::process::exit(1);
        }
    };

    // Wiring order follows the dependency chain: store -> recall -> cognitive
    // controller -> policy engine -> job queue -> capability registry /
    // autonomous manager -> Sabha -> Nidra/Chitragupta last, since its
    // on-dream callback reaches back into the store and recall engine above.
    let recall = Arc::new(RecallEngine::new(config.recall.clone()));
    let _bridge = Arc::new(MemoryBridge::new(session_store.clone(), recall.clone()));

    let _chetana = Arc::new(AsyncMutex::new(ChetanaController::new(config.chetana.clone())));

    let _policy = PolicyEngine::new(config.policy.permissive_on_error);
    let approval_storage = match Storage::open(home.join("sessions.db")) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to open approval storage: {e}");
            std::process::exit(1);
        }
    };
    let _approvals = Arc::new(ApprovalGate::new(
        approval_storage,
        config.policy.approval_timeout_secs,
        config.policy.max_pending_approvals,
    ));

    let _jobs = JobQueue::new(config.jobs.max_concurrent, config.jobs.max_queue_size, config.jobs.max_events_per_job);

    let _registry = Arc::new(AsyncMutex::new(ServerRegistry::new()));
    let _autonomous = Arc::new(AsyncMutex::new(AutonomousManager::new(
        config.capability.circuit_window_secs,
        config.capability.circuit_failure_threshold,
        config.capability.circuit_cooldown_secs,
        config.capability.quarantine_max_crashes,
        config.capability.quarantine_crash_window_secs,
        config.capability.quarantine_duration_secs,
    )));

    // Sabha deliberations are convened on demand by whatever drives the
    // capability layer above; there is no standing Sabha instance to wire.

    let nidra = match Nidra::restore(
        session_store.storage(),
        config.nidra.idle_threshold_secs,
        config.nidra.heartbeat_interval_secs,
    ) {
        Ok(n) => Arc::new(n),
        Err(e) => {
            error!("failed to restore nidra state: {e}");
            std::process::exit(1);
        }
    };
    let chitragupta = Arc::new(Chitragupta::new(
        &home,
        nidra.clone(),
        config.nidra.retention_months,
        config.nidra.max_backfill_days,
    ));

    // Same-day consolidation on idle transition (spec §4.3.2: Nidra's
    // LISTENING -> DREAMING edge triggers a light consolidation pass).
    // `on_dream` handlers are synchronous, so the pass runs on a blocking
    // thread rather than the tokio worker that fired it.
    {
        let chitragupta = chitragupta.clone();
        let session_store = session_store.clone();
        let handle = tokio::runtime::Handle::current();
        nidra.on_dream(move |_phase, _progress| {
            let chitragupta = chitragupta.clone();
            let session_store = session_store.clone();
            handle.spawn_blocking(move || {
                let today = Utc::now().date_naive();
                match chitragupta.consolidate_date(&session_store, today) {
                    Ok(Some(summary)) => info!(
                        sessions = summary.sessions_processed,
                        projects = summary.project_count,
                        facts = summary.extracted_facts,
                        duration_ms = summary.duration_ms,
                        "consolidation complete"
                    ),
                    Ok(None) => info!("consolidation already running, skipped"),
                    Err(e) => warn!("consolidation failed: {e}"),
                }
            });
        });
    }

    if config.nidra.backfill_on_startup {
        let chitragupta = chitragupta.clone();
        let session_store = session_store.clone();
        tokio::task::spawn_blocking(move || {
            let today = Utc::now().date_naive();
            match chitragupta.backfill_missed_days(&session_store, today) {
                Ok(summaries) if !summaries.is_empty() => {
                    info!(days = summaries.len(), "backfilled missed consolidation days")
                }
                Ok(_) => {}
                Err(e) => warn!("backfill failed: {e}"),
            }
        });
    }

    // Heartbeat/idle-check loop: keeps Nidra's persisted state fresh and
    // fires the dream transition once the process has been idle long
    // enough (spec §3.4).
    {
        let nidra = nidra.clone();
        let session_store = session_store.clone();
        let heartbeat_interval = config.nidra.heartbeat_interval_secs.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(heartbeat_interval));
            loop {
                ticker.tick().await;
                if let Err(e) = nidra.heartbeat(session_store.storage()) {
                    warn!("nidra heartbeat failed: {e}");
                }
                if let Err(e) = nidra.check_idle(session_store.storage()) {
                    warn!("nidra idle check failed: {e}");
                }
            }
        });
    }

    // Daily archive sweep: moves day files past `retention_months` into the
    // archive directory. Checked hourly; cheap no-op when nothing is due.
    {
        let chitragupta = chitragupta.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                let today = Utc::now().date_naive();
                match tokio::task::spawn_blocking({
                    let chitragupta = chitragupta.clone();
                    move || chitragupta.archive_old_days(today)
                })
                .await
                {
                    Ok(Ok(archived)) if archived > 0 => info!(archived, "archived old day files"),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("archive sweep failed: {e}"),
                    Err(e) => warn!("archive sweep task panicked: {e}"),
                }
            }
        });
    }

    info!("antara daemon ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
    }

    info!("shutting down");
    if let Err(e) = nidra.stop(session_store.storage()) {
        warn!("failed to flush nidra state on shutdown: {e}");
    }
}
