//! Mooring sync agent
//!
//! Runs next to an application that writes through a Mooring SQLite store and
//! replays its queued mutations against the remote REST store:
//! 1. Probes the remote for reachability
//! 2. Replays the pending-action queue when online, on a timer and on demand
//! 3. Serves queue status and dead letters over HTTP
//!
//! Usage:
//!   mooring-agent --db app.db --remote-url https://api.example.com run
//!   mooring-agent --db app.db dead-letters

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mooring_agent::{AgentConfig, AppState, build_router};
use mooring_recovery::RecoveryEngine;
use mooring_storage::{LocalStore, SqliteLocalStore};
use mooring_sync::{
    ConnectivityMonitor, HttpRemoteStore, PendingActionQueue, Reconciler, RemoteStore, SyncWorker,
};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How long the network recovery strategy waits for connectivity.
const RECOVERY_CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "mooring-agent")]
#[command(about = "Offline-first sync agent for Mooring stores")]
struct Args {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Base URL of the remote REST store
    #[arg(long, global = true)]
    remote_url: Option<String>,

    /// Bearer token for the remote store
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// JSON config file; command-line flags take precedence
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync worker, the connectivity probe and the status API
    Run {
        /// HTTP API port for the status endpoints
        #[arg(long, default_value = "4100")]
        http_port: u16,
    },
    /// Run a single sync pass and print its summary
    Sync,
    /// List actions waiting to be replayed
    Pending {
        #[arg(long)]
        collection: Option<String>,
    },
    /// Print abandoned actions as JSON
    DeadLetters {
        #[arg(long)]
        collection: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    }
    .overlay(args.db.clone(), args.remote_url.clone(), args.api_key.clone());

    let db_path = config.db_path();
    let store: Arc<dyn LocalStore> = Arc::new(
        SqliteLocalStore::open(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?,
    );

    match args.command {
        Command::Run { http_port } => run(config, store, http_port).await,
        Command::Sync => sync_once(config, store).await,
        Command::Pending { collection } => {
            let queue = PendingActionQueue::new(store);
            let actions = queue
                .list_unsynced(collection.as_deref())
                .await
                .context("Failed to list pending actions")?;
            for action in &actions {
                println!(
                    "{}  {:<6}  {:<16}  {}  retries={}",
                    action.enqueued_at.to_rfc3339(),
                    action.kind,
                    action.collection,
                    action.id,
                    action.retry_count
                );
            }
            println!("{} pending", actions.len());
            Ok(())
        }
        Command::DeadLetters { collection } => {
            let queue = PendingActionQueue::new(store);
            let letters = queue
                .dead_letters(collection.as_deref())
                .await
                .context("Failed to list dead letters")?;
            println!("{}", serde_json::to_string_pretty(&letters)?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn remote_store(config: &AgentConfig) -> Result<Arc<dyn RemoteStore>> {
    let remote = HttpRemoteStore::new(config.remote.clone())
        .context("Failed to build HTTP remote store")?;
    Ok(Arc::new(remote))
}

async fn sync_once(config: AgentConfig, store: Arc<dyn LocalStore>) -> Result<()> {
    let remote = remote_store(&config)?;
    let online = match remote.health().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Remote store unreachable: {}", e);
            false
        }
    };
    let monitor = ConnectivityMonitor::new(online);
    let reconciler = Reconciler::new(store, remote, monitor, config.sync);

    let summary = reconciler.sync().await.context("Sync pass failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run(config: AgentConfig, store: Arc<dyn LocalStore>, http_port: u16) -> Result<()> {
    info!("Mooring agent starting...");
    let remote = remote_store(&config)?;

    // Offline until the first probe answers.
    let monitor = ConnectivityMonitor::new(false);
    let probe = monitor.spawn_probe(remote.clone(), config.sync.probe_interval());

    let recovery = RecoveryEngine::new();
    recovery.register_defaults(monitor.subscribe(), RECOVERY_CONNECTIVITY_TIMEOUT, store.clone());

    let reconciler = Arc::new(
        Reconciler::new(store, remote, monitor, config.sync.clone())
            .with_recovery(recovery.clone()),
    );
    let worker = SyncWorker::new(reconciler.clone()).spawn();

    let app = build_router(AppState {
        reconciler,
        recovery: Some(recovery),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", http_port))
        .await
        .with_context(|| format!("Failed to bind HTTP port {}", http_port))?;
    info!("HTTP status endpoint listening on port {}", http_port);
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    println!("\n========================================");
    println!("  Mooring Agent Running");
    println!("========================================");
    println!("  Database:  {}", config.db_path().display());
    println!("  Remote:    {}", config.remote.base_url);
    println!("  HTTP Port: {}", http_port);
    println!("  Interval:  {:?}", config.sync.sync_interval());
    println!("========================================\n");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested");
        }
        result = server => {
            result.context("HTTP server task failed")?.context("HTTP server failed")?;
        }
    }

    probe.abort();
    worker.shutdown().await;
    info!("Mooring agent stopped");
    Ok(())
}
