//! Resource cleanup coordinator.
//!
//! Given one workspace, guarantees every associated resource is released
//! across subsystems with independent failure modes, maximizing how much
//! cleanup completes when some backend is unreachable. The workspace's own
//! database row is deleted last, so a retry after a crash mid-way can still
//! re-derive what needs cleaning. A billing customer's workspace deletion
//! must never get stuck because one of four external systems is down.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::models::cleanup::{format_bytes, CleanupOutcome, CleanupStats};
use crate::models::workspace::Workspace;
use crate::multiplayer::orchestrator::SessionOrchestrator;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::workspace_repo::WorkspaceRepo;
use crate::runtime::{CacheInvalidator, ObjectStore, ProcessRuntime, TaskScheduler};
use crate::Result;

use super::steps::{
    CacheInvalidationStep, PreviewProcessStep, RemoteTaskReclaimStep, SessionTeardownStep,
    StoragePurgeStep,
};
use super::{CleanupContext, CleanupStep};

/// Drives workspace teardown across all cleanup steps.
pub struct CleanupCoordinator {
    config: Arc<GlobalConfig>,
    workspaces: WorkspaceRepo,
    sessions: SessionRepo,
    steps: Vec<Box<dyn CleanupStep>>,
}

impl CleanupCoordinator {
    /// Build a coordinator with the standard step list: sessions, preview
    /// process, storage, CDN cache, remote tasks.
    #[must_use]
    #[allow(clippy::too_many_arguments)] // wiring point for every backend seam
    pub fn new(
        config: Arc<GlobalConfig>,
        workspaces: WorkspaceRepo,
        sessions: SessionRepo,
        orchestrator: Arc<SessionOrchestrator>,
        runtime: Arc<dyn ProcessRuntime>,
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn CacheInvalidator>,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> Self {
        let steps: Vec<Box<dyn CleanupStep>> = vec![
            Box::new(SessionTeardownStep::new(
                &config,
                orchestrator,
                Arc::clone(&store),
            )),
            Box::new(PreviewProcessStep::new(runtime)),
            Box::new(StoragePurgeStep::new(&config, store)),
            Box::new(CacheInvalidationStep::new(cache)),
            Box::new(RemoteTaskReclaimStep::new(scheduler)),
        ];
        Self {
            config,
            workspaces,
            sessions,
            steps,
        }
    }

    /// Release every resource associated with a workspace, then delete its
    /// rows. Never throws: sub-step failures are logged and folded into the
    /// outcome, and `success` is cleared only when the final row deletion
    /// fails. Re-entrant — each step checks whether its target still exists
    /// before acting.
    pub async fn cleanup_workspace(&self, workspace: &Workspace) -> CleanupOutcome {
        info!(workspace_id = workspace.id, "starting workspace cleanup");
        let mut outcome = CleanupOutcome::default();

        let sessions = match self.sessions.list_for_workspace(&workspace.id).await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(workspace_id = workspace.id, %err, "failed to load sessions for cleanup");
                Vec::new()
            }
        };
        let ctx = CleanupContext {
            workspace: workspace.clone(),
            sessions,
        };

        for step in &self.steps {
            let report = step.run(&ctx).await;
            debug!(
                workspace_id = workspace.id,
                step = step.name(),
                "cleanup step finished"
            );
            outcome.sessions_terminated += report.sessions_terminated;
            outcome.files_cleaned += report.files_cleaned;
            outcome.storage_freed_bytes += report.storage_freed_bytes;
            outcome.cache_paths_cleaned += report.cache_paths_cleaned;
            outcome.remote_tasks_stopped += report.remote_tasks_stopped;
        }

        // Rows go last: sessions first, then the workspace itself, so an
        // interrupted run can still find the workspace on retry.
        if let Err(err) = self.sessions.delete_for_workspace(&workspace.id).await {
            warn!(workspace_id = workspace.id, %err, "failed to delete session rows");
        }
        match self.workspaces.delete(&workspace.id).await {
            Ok(_) => outcome.success = true,
            Err(err) => {
                warn!(workspace_id = workspace.id, %err, "failed to delete workspace row");
                outcome.error = Some(format!("failed to delete workspace row: {err}"));
            }
        }

        info!(
            workspace_id = workspace.id,
            success = outcome.success,
            sessions_terminated = outcome.sessions_terminated,
            files_cleaned = outcome.files_cleaned,
            storage_freed = %format_bytes(outcome.storage_freed_bytes),
            cache_paths_cleaned = outcome.cache_paths_cleaned,
            remote_tasks_stopped = outcome.remote_tasks_stopped,
            "workspace cleanup finished"
        );
        outcome
    }

    /// Fleet-level counters: total workspaces, sweep candidates, active
    /// sessions, and expired-but-unswept sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any count query fails.
    pub async fn get_cleanup_stats(&self) -> Result<CleanupStats> {
        let now = Utc::now();
        let cutoff = now - Duration::hours(self.config.cleanup.workspace_max_age_hours);

        Ok(CleanupStats {
            total_workspaces: self.workspaces.count().await?,
            old_workspaces: self.workspaces.count_older_than(cutoff).await?,
            active_sessions: self.sessions.count_active(now).await?,
            expired_sessions: self.sessions.count_pending_sweep(now).await?,
        })
    }
}
