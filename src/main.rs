#![forbid(unsafe_code)]

//! `playhost` — workspace process & session lifecycle manager binary.
//!
//! Bootstraps configuration, connects the database, and either runs the
//! periodic sweepers (`run`) or executes a one-shot maintenance command.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use playhost::cleanup::coordinator::CleanupCoordinator;
use playhost::config::GlobalConfig;
use playhost::models::cleanup::format_bytes;
use playhost::models::workspace::EngineType;
use playhost::multiplayer::orchestrator::SessionOrchestrator;
use playhost::persistence::db;
use playhost::persistence::session_repo::SessionRepo;
use playhost::persistence::workspace_repo::WorkspaceRepo;
use playhost::runtime::cache::HttpCacheInvalidator;
use playhost::runtime::preview::HttpPreviewClient;
use playhost::runtime::process::HostProcessRuntime;
use playhost::runtime::scheduler::HttpTaskScheduler;
use playhost::runtime::storage::LocalDiskStore;
use playhost::runtime::{
    CacheInvalidator, ObjectStore, PreviewEndpoint, ProcessRuntime, TaskScheduler,
};
use playhost::supervisor::health::OverallHealth;
use playhost::supervisor::server::ProcessSupervisor;
use playhost::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum EngineArg {
    Playcanvas,
    Unreal,
    Gdevelop,
}

impl From<EngineArg> for EngineType {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Playcanvas => Self::Playcanvas,
            EngineArg::Unreal => Self::Unreal,
            EngineArg::Gdevelop => Self::Gdevelop,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "playhost", about = "Workspace process & session lifecycle manager", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the session and workspace sweepers until interrupted.
    Run,
    /// One-shot sweep of expired multiplayer sessions.
    SweepSessions,
    /// Clean up workspaces older than the given age and all their resources.
    CleanupWorkspaces {
        /// Age threshold in hours; defaults to the configured policy.
        #[arg(long)]
        hours: Option<i64>,
        /// Only clean workspaces of this engine type.
        #[arg(long, value_enum)]
        engine: Option<EngineArg>,
        /// List what would be cleaned without doing it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Health-check every supervised preview server and auto-restart the
    /// unhealthy ones.
    Monitor,
    /// Print lifecycle statistics as JSON.
    Stats,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Fully wired service graph.
struct Services {
    config: Arc<GlobalConfig>,
    workspaces: WorkspaceRepo,
    supervisor: ProcessSupervisor,
    orchestrator: Arc<SessionOrchestrator>,
    coordinator: Arc<CleanupCoordinator>,
    scheduler: Arc<dyn TaskScheduler>,
    cache: Arc<dyn CacheInvalidator>,
}

async fn build_services(config_path: &std::path::Path) -> Result<Services> {
    let config = Arc::new(GlobalConfig::load(config_path)?);
    info!("configuration loaded");

    let pool = Arc::new(db::connect(&config.db_path).await?);
    info!("database connected");

    let workspaces = WorkspaceRepo::new(Arc::clone(&pool));
    let sessions = SessionRepo::new(Arc::clone(&pool));

    let runtime: Arc<dyn ProcessRuntime> = Arc::new(HostProcessRuntime::new(&config.preview));
    let endpoint: Arc<dyn PreviewEndpoint> = Arc::new(HttpPreviewClient::new(&config.preview));
    let scheduler: Arc<dyn TaskScheduler> = Arc::new(HttpTaskScheduler::new(&config.multiplayer));
    let store: Arc<dyn ObjectStore> = Arc::new(LocalDiskStore::new(&config.storage));
    let cache: Arc<dyn CacheInvalidator> = Arc::new(HttpCacheInvalidator::new(&config.cdn));

    let supervisor = ProcessSupervisor::new(
        Arc::clone(&config),
        workspaces.clone(),
        Arc::clone(&runtime),
        endpoint,
    );
    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::clone(&config),
        sessions.clone(),
        workspaces.clone(),
        Arc::clone(&scheduler),
    ));
    let coordinator = Arc::new(CleanupCoordinator::new(
        Arc::clone(&config),
        workspaces.clone(),
        sessions,
        Arc::clone(&orchestrator),
        runtime,
        store,
        Arc::clone(&cache),
        Arc::clone(&scheduler),
    ));

    Ok(Services {
        config,
        workspaces,
        supervisor,
        orchestrator,
        coordinator,
        scheduler,
        cache,
    })
}

async fn run(args: Cli) -> Result<()> {
    let services = build_services(&args.config).await?;

    match args.command {
        Command::Run => run_sweepers(&services).await,
        Command::SweepSessions => {
            let count = services.orchestrator.cleanup_expired_sessions().await?;
            info!(count, "expired session sweep finished");
            Ok(())
        }
        Command::CleanupWorkspaces {
            hours,
            engine,
            dry_run,
        } => cleanup_workspaces(&services, hours, engine.map(EngineType::from), dry_run).await,
        Command::Monitor => monitor_servers(&services).await,
        Command::Stats => print_stats(&services).await,
    }
}

/// Health-check every workspace with a recorded process binding and
/// auto-restart the ones that are not fully healthy.
async fn monitor_servers(services: &Services) -> Result<()> {
    let supervised = services.workspaces.list_with_bindings().await?;
    if supervised.is_empty() {
        info!("no supervised preview servers to monitor");
        return Ok(());
    }

    let max_attempts = services.config.preview.max_restart_attempts;
    for workspace in &supervised {
        let report = services.supervisor.perform_health_check(&workspace.id).await?;
        if report.overall == OverallHealth::Healthy {
            continue;
        }
        warn!(
            workspace_id = workspace.id,
            overall = ?report.overall,
            process = report.process.message,
            endpoint = report.endpoint.message,
            files = report.files.message,
            "unhealthy preview server; attempting auto-restart"
        );
        match services
            .supervisor
            .auto_restart_server(&workspace.id, max_attempts)
            .await
        {
            Ok(binding) => {
                info!(
                    workspace_id = workspace.id,
                    port = binding.port,
                    pid = binding.pid,
                    "preview server recovered"
                );
            }
            Err(err) => {
                warn!(workspace_id = workspace.id, %err, "auto-restart failed; workspace left in error state");
            }
        }
    }
    Ok(())
}

async fn run_sweepers(services: &Services) -> Result<()> {
    let cancel = CancellationToken::new();
    let session_sweeper = playhost::sweeper::spawn_session_sweeper(
        Arc::clone(&services.orchestrator),
        &services.config.cleanup,
        cancel.clone(),
    );
    let workspace_sweeper = playhost::sweeper::spawn_workspace_sweeper(
        Arc::clone(&services.coordinator),
        services.workspaces.clone(),
        &services.config.cleanup,
        cancel.clone(),
    );
    info!("sweepers started; waiting for shutdown signal");

    wait_for_shutdown().await;
    info!("shutdown signal received");
    cancel.cancel();
    let _ = session_sweeper.await;
    let _ = workspace_sweeper.await;
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    warn!(%err, "failed to install SIGTERM handler; using ctrl-c only");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn cleanup_workspaces(
    services: &Services,
    hours: Option<i64>,
    engine: Option<EngineType>,
    dry_run: bool,
) -> Result<()> {
    let hours = hours.unwrap_or(services.config.cleanup.workspace_max_age_hours);
    let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours);
    let stale = services.workspaces.list_older_than(cutoff, engine).await?;

    if stale.is_empty() {
        info!(hours, "no old workspaces found to clean up");
        return Ok(());
    }
    info!(count = stale.len(), hours, "found workspaces to clean up");

    if dry_run {
        for workspace in &stale {
            info!(
                workspace_id = workspace.id,
                name = workspace.name,
                created_at = %workspace.created_at,
                "[dry-run] would clean up workspace and all associated resources"
            );
        }
        return Ok(());
    }

    let mut cleaned = 0u32;
    let mut failed = 0u32;
    for workspace in &stale {
        let outcome = services.coordinator.cleanup_workspace(workspace).await;
        if outcome.success {
            cleaned += 1;
            info!(
                workspace_id = workspace.id,
                sessions_terminated = outcome.sessions_terminated,
                files_cleaned = outcome.files_cleaned,
                storage_freed = %format_bytes(outcome.storage_freed_bytes),
                "workspace cleaned up"
            );
        } else {
            failed += 1;
            warn!(
                workspace_id = workspace.id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "workspace cleanup failed"
            );
        }
    }

    info!(cleaned, failed, total = stale.len(), "workspace cleanup completed");
    if failed > 0 {
        return Err(AppError::Db(format!(
            "{failed} of {} workspace cleanups failed",
            stale.len()
        )));
    }
    Ok(())
}

async fn print_stats(services: &Services) -> Result<()> {
    let cleanup = services.coordinator.get_cleanup_stats().await?;
    let sessions = services.orchestrator.get_session_stats().await?;
    let cluster = match services.scheduler.cluster_stats().await {
        Ok(stats) => Some(stats),
        Err(err) => {
            warn!(%err, "cluster stats unavailable");
            None
        }
    };
    let invalidations = if services.cache.is_enabled() {
        match services.cache.list_recent(10).await {
            Ok(recent) => recent,
            Err(err) => {
                warn!(%err, "recent invalidations unavailable");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let report = serde_json::json!({
        "cleanup": cleanup,
        "sessions": sessions,
        "cluster": cluster,
        "recent_invalidations": invalidations,
    });
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::Io(format!("failed to render stats: {err}")))?;
    println!("{rendered}");
    Ok(())
}
