//! Periodic sweepers for expired sessions and stale workspaces.
//!
//! The session sweeper bounds how long an abandoned session's remote
//! compute cost accrues; the lazy check on every status read already keeps
//! players out past expiry even when this task is delayed. The workspace
//! sweeper feeds old workspaces to the cleanup coordinator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cleanup::coordinator::CleanupCoordinator;
use crate::config::CleanupConfig;
use crate::multiplayer::orchestrator::SessionOrchestrator;
use crate::persistence::workspace_repo::WorkspaceRepo;

/// Spawn the expired-session sweep background task.
///
/// Each tick runs `cleanup_expired_sessions`; the lazy-expiry read path and
/// this sweep converge to the same terminal state for every session.
#[must_use]
pub fn spawn_session_sweeper(
    orchestrator: Arc<SessionOrchestrator>,
    config: &CleanupConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(config.session_sweep_interval_seconds);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("session sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match orchestrator.cleanup_expired_sessions().await {
                        Ok(count) if count > 0 => {
                            info!(count, "session sweep tick completed");
                        }
                        Ok(_) => {}
                        Err(err) => error!(%err, "session sweep failed"),
                    }
                }
            }
        }
    })
}

/// Spawn the stale-workspace sweep background task.
///
/// Each tick feeds workspaces older than the configured age threshold to
/// the cleanup coordinator. Per-workspace outcomes are best-effort; a
/// workspace whose cleanup reports failure is retried on the next tick
/// because its row is still present.
#[must_use]
pub fn spawn_workspace_sweeper(
    coordinator: Arc<CleanupCoordinator>,
    workspaces: WorkspaceRepo,
    config: &CleanupConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(config.workspace_sweep_interval_seconds);
    let max_age_hours = config.workspace_max_age_hours;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("workspace sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    sweep_workspaces(&coordinator, &workspaces, max_age_hours).await;
                }
            }
        }
    })
}

async fn sweep_workspaces(
    coordinator: &CleanupCoordinator,
    workspaces: &WorkspaceRepo,
    max_age_hours: i64,
) {
    let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);
    let stale = match workspaces.list_older_than(cutoff, None).await {
        Ok(stale) => stale,
        Err(err) => {
            error!(%err, "failed to list stale workspaces");
            return;
        }
    };
    if stale.is_empty() {
        return;
    }

    info!(count = stale.len(), max_age_hours, "sweeping stale workspaces");
    let mut cleaned = 0u32;
    let mut failed = 0u32;
    for workspace in &stale {
        let outcome = coordinator.cleanup_workspace(workspace).await;
        if outcome.success {
            cleaned += 1;
        } else {
            failed += 1;
        }
    }
    info!(cleaned, failed, "workspace sweep tick completed");
}
