//! Concrete cleanup steps over the heterogeneous backends.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::models::workspace::Workspace;
use crate::multiplayer::orchestrator::SessionOrchestrator;
use crate::runtime::{BoxFuture, CacheInvalidator, ObjectStore, ProcessRuntime, TaskScheduler};

use super::{CleanupContext, CleanupStep, StepReport};

// ── Session teardown ─────────────────────────────────────────────────────────

/// Stops every non-stopped session and purges its session-scoped storage
/// (recorded snapshots, save files).
pub struct SessionTeardownStep {
    orchestrator: Arc<SessionOrchestrator>,
    store: Arc<dyn ObjectStore>,
    disk: String,
    base_path: String,
}

impl SessionTeardownStep {
    /// Build the step from the orchestrator and the multiplayer disk.
    #[must_use]
    pub fn new(
        config: &GlobalConfig,
        orchestrator: Arc<SessionOrchestrator>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            disk: config.storage.multiplayer_disk.clone(),
            base_path: config.storage.multiplayer_path.clone(),
        }
    }
}

impl CleanupStep for SessionTeardownStep {
    fn name(&self) -> &'static str {
        "sessions"
    }

    fn run<'a>(&'a self, ctx: &'a CleanupContext) -> BoxFuture<'a, StepReport> {
        Box::pin(async move {
            let mut report = StepReport::default();

            for session in &ctx.sessions {
                if !session.is_stopped() {
                    match self.orchestrator.stop_session(&session.id).await {
                        Ok(true) => report.sessions_terminated += 1,
                        Ok(false) => {}
                        Err(err) => {
                            warn!(
                                workspace_id = ctx.workspace.id,
                                session_id = session.id,
                                %err,
                                "failed to stop session during cleanup"
                            );
                        }
                    }
                }

                let prefix = format!(
                    "{}/{}/{}/{}",
                    self.base_path, ctx.workspace.company_id, ctx.workspace.id, session.id
                );
                match self.store.remove_prefix(&self.disk, &prefix).await {
                    Ok(summary) => {
                        report.files_cleaned += summary.files_removed;
                        report.storage_freed_bytes += summary.bytes_freed;
                    }
                    Err(err) => {
                        warn!(
                            session_id = session.id,
                            disk = self.disk,
                            %err,
                            "failed to purge session storage"
                        );
                    }
                }
            }

            report
        })
    }
}

// ── Preview process ──────────────────────────────────────────────────────────

/// Terminates the supervised preview process, when one is recorded.
pub struct PreviewProcessStep {
    runtime: Arc<dyn ProcessRuntime>,
}

impl PreviewProcessStep {
    /// Build the step over the process runtime.
    #[must_use]
    pub fn new(runtime: Arc<dyn ProcessRuntime>) -> Self {
        Self { runtime }
    }
}

impl CleanupStep for PreviewProcessStep {
    fn name(&self) -> &'static str {
        "preview-process"
    }

    fn run<'a>(&'a self, ctx: &'a CleanupContext) -> BoxFuture<'a, StepReport> {
        Box::pin(async move {
            if let Some(pid) = ctx.workspace.preview_pid {
                match self.runtime.kill(pid).await {
                    Ok(outcome) => {
                        info!(workspace_id = ctx.workspace.id, pid, ?outcome, "preview process released");
                    }
                    Err(err) => {
                        warn!(workspace_id = ctx.workspace.id, pid, %err, "failed to kill preview process");
                    }
                }
            }
            StepReport::default()
        })
    }
}

// ── Object storage ───────────────────────────────────────────────────────────

/// Purges the workspace source prefix, the builds prefix, and the
/// metadata-recorded latest build path, which may live on a different disk.
/// Every prefix is attempted even if another backend is unavailable.
pub struct StoragePurgeStep {
    store: Arc<dyn ObjectStore>,
    workspace_disk: String,
    builds_disk: String,
}

impl StoragePurgeStep {
    /// Build the step from the configured disks.
    #[must_use]
    pub fn new(config: &GlobalConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            workspace_disk: config.storage.workspace_disk.clone(),
            builds_disk: config.storage.builds_disk.clone(),
        }
    }

    async fn purge(&self, report: &mut StepReport, disk: &str, prefix: &str) {
        match self.store.remove_prefix(disk, prefix).await {
            Ok(summary) => {
                report.files_cleaned += summary.files_removed;
                report.storage_freed_bytes += summary.bytes_freed;
            }
            Err(err) => {
                warn!(disk, prefix, %err, "failed to purge storage prefix");
            }
        }
    }
}

impl CleanupStep for StoragePurgeStep {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn run<'a>(&'a self, ctx: &'a CleanupContext) -> BoxFuture<'a, StepReport> {
        Box::pin(async move {
            let mut report = StepReport::default();
            let workspace = &ctx.workspace;

            self.purge(&mut report, &self.workspace_disk, &workspace.storage_prefix())
                .await;
            self.purge(&mut report, &self.builds_disk, &workspace.builds_prefix())
                .await;

            // A build operation may have recorded its artifacts on a disk
            // other than the default builds disk.
            if let Some(build_path) = workspace.latest_build_path() {
                let disk = workspace
                    .build_storage_disk()
                    .unwrap_or(self.builds_disk.as_str())
                    .to_owned();
                let build_path = build_path.to_owned();
                self.purge(&mut report, &disk, &build_path).await;
            }

            report
        })
    }
}

// ── CDN cache ────────────────────────────────────────────────────────────────

/// Invalidates every CDN path pattern the workspace could have populated.
/// Failures (or an unconfigured CDN) report zero paths cleaned.
pub struct CacheInvalidationStep {
    cache: Arc<dyn CacheInvalidator>,
}

impl CacheInvalidationStep {
    /// Build the step over the invalidation client.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheInvalidator>) -> Self {
        Self { cache }
    }

    /// Path patterns the workspace and its sessions could have populated.
    fn paths_for(ctx: &CleanupContext) -> Vec<String> {
        let workspace = &ctx.workspace;
        let mut paths = vec![
            format!("/builds/{}/{}/*", workspace.company_id, workspace.id),
            format!("/workspaces/{}/{}/*", workspace.company_id, workspace.id),
            format!("/api/workspace/{}/*", workspace.id),
        ];
        if let Some(published) = published_path(workspace) {
            paths.push(published);
        }
        for session in &ctx.sessions {
            paths.push(format!("/multiplayer/session/{}/*", session.id));
            paths.push(format!("/api/multiplayer/session/{}/*", session.id));
        }
        paths
    }
}

/// Path component of the published URL, as an invalidation pattern.
fn published_path(workspace: &Workspace) -> Option<String> {
    let url = workspace.published_url.as_deref()?;
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = &without_scheme[without_scheme.find('/')?..];
    Some(format!("{path}*"))
}

impl CleanupStep for CacheInvalidationStep {
    fn name(&self) -> &'static str {
        "cdn-cache"
    }

    fn run<'a>(&'a self, ctx: &'a CleanupContext) -> BoxFuture<'a, StepReport> {
        Box::pin(async move {
            let mut report = StepReport::default();
            if !self.cache.is_enabled() {
                return report;
            }

            let paths = Self::paths_for(ctx);
            match self.cache.invalidate(&paths).await {
                Ok(Some(invalidation_id)) => {
                    report.cache_paths_cleaned =
                        u32::try_from(paths.len()).unwrap_or(u32::MAX);
                    info!(
                        workspace_id = ctx.workspace.id,
                        invalidation_id,
                        paths = paths.len(),
                        "cdn invalidation submitted"
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(workspace_id = ctx.workspace.id, %err, "cdn invalidation failed");
                }
            }
            report
        })
    }
}

// ── Remote tasks ─────────────────────────────────────────────────────────────

/// Stops every remote task handle recorded on the workspace's sessions,
/// then discovers and stops tasks tagged with the workspace id that no
/// session row references — defense in depth against task records that
/// outlived their session.
pub struct RemoteTaskReclaimStep {
    scheduler: Arc<dyn TaskScheduler>,
}

impl RemoteTaskReclaimStep {
    /// Build the step over the scheduler client.
    #[must_use]
    pub fn new(scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self { scheduler }
    }

    async fn stop_handle(&self, handle: &str, reason: &str) -> bool {
        match self.scheduler.stop_task(handle, reason).await {
            Ok(_) => true,
            Err(err) => {
                warn!(handle, %err, "failed to stop remote task during cleanup");
                false
            }
        }
    }
}

impl CleanupStep for RemoteTaskReclaimStep {
    fn name(&self) -> &'static str {
        "remote-tasks"
    }

    fn run<'a>(&'a self, ctx: &'a CleanupContext) -> BoxFuture<'a, StepReport> {
        Box::pin(async move {
            let mut report = StepReport::default();
            let workspace_id = &ctx.workspace.id;
            let reason = format!("Workspace {workspace_id} cleanup");

            let mut seen: HashSet<&str> = HashSet::new();
            for session in &ctx.sessions {
                if let Some(handle) = session.remote_task_id.as_deref() {
                    seen.insert(handle);
                    if self.stop_handle(handle, &reason).await {
                        report.remote_tasks_stopped += 1;
                    }
                }
            }

            match self.scheduler.list_tasks_for_workspace(workspace_id).await {
                Ok(orphans) => {
                    for handle in &orphans {
                        if seen.contains(handle.as_str()) {
                            continue;
                        }
                        if self.stop_handle(handle, &reason).await {
                            report.remote_tasks_stopped += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!(workspace_id, %err, "failed to list orphaned remote tasks");
                }
            }

            report
        })
    }
}
