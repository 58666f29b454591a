//! Preview server process supervisor.
//!
//! Owns the full lifecycle of the one background server process a
//! preview-capable workspace needs. The supervised process is modeled as
//! the `{port, pid}` pair persisted on the workspace row, so supervision
//! survives manager restarts: liveness is re-derived from the persisted pid
//! rather than in-memory state. Prompt persistence of a healthy binding is
//! also what lets a second concurrent start observe it and short-circuit
//! instead of racing to a duplicate process.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::models::workspace::{Workspace, WorkspaceStatus};
use crate::persistence::workspace_repo::WorkspaceRepo;
use crate::runtime::{KillOutcome, PreviewEndpoint, ProcessRuntime, ServerSpec};
use crate::{AppError, Result};

use super::health::{CheckResult, HealthReport};
use super::ports::PortAllocator;

/// Connection details of a healthy supervised server.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServerBinding {
    /// Allocated preview port.
    pub port: u16,
    /// OS process id.
    pub pid: u32,
    /// Externally reachable preview URL.
    pub preview_url: String,
}

/// Coarse server state derived from pid liveness and endpoint health.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// No pid recorded, or the OS reports the pid dead.
    Stopped,
    /// Pid alive but the health endpoint does not respond.
    Unhealthy,
    /// Pid alive and the health endpoint responds.
    Running,
}

/// Supervises one preview server process per preview-capable workspace.
pub struct ProcessSupervisor {
    config: Arc<GlobalConfig>,
    workspaces: WorkspaceRepo,
    runtime: Arc<dyn ProcessRuntime>,
    endpoint: Arc<dyn PreviewEndpoint>,
    ports: PortAllocator,
}

impl ProcessSupervisor {
    /// Build a supervisor over the given collaborators.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        workspaces: WorkspaceRepo,
        runtime: Arc<dyn ProcessRuntime>,
        endpoint: Arc<dyn PreviewEndpoint>,
    ) -> Self {
        let ports = PortAllocator::new(&config.preview);
        Self {
            config,
            workspaces,
            runtime,
            endpoint,
            ports,
        }
    }

    /// Start the preview server for a workspace, or return the existing
    /// healthy binding unchanged.
    ///
    /// # Errors
    ///
    /// - `AppError::UnsupportedEngine` if the engine has no live preview.
    /// - `AppError::ResourceExhausted` if no port is free.
    /// - `AppError::StartFailed` if the process never becomes healthy; the
    ///   workspace is left in `error` status and the partial process killed.
    pub async fn start_server(&self, workspace_id: &str) -> Result<ServerBinding> {
        let workspace = self.workspaces.get_by_id(workspace_id).await?;
        if !workspace.engine_type.supports_live_preview() {
            return Err(AppError::UnsupportedEngine(format!(
                "workspace {workspace_id} engine does not support live preview"
            )));
        }

        if let Some(existing) = self.existing_healthy_binding(&workspace).await {
            info!(
                workspace_id,
                port = existing.port,
                pid = existing.pid,
                "preview server already healthy; reusing binding"
            );
            return Ok(existing);
        }

        // A stale binding means a dead or unresponsive process; make sure it
        // is gone before launching a replacement on a fresh port.
        if let Some(stale_pid) = workspace.preview_pid {
            if let Err(err) = self.runtime.kill(stale_pid).await {
                warn!(workspace_id, pid = stale_pid, %err, "failed to reap stale preview process");
            }
        }

        let in_use: HashSet<u16> = self
            .workspaces
            .list_assigned_ports()
            .await?
            .into_iter()
            .collect();
        let port = self.ports.allocate(&in_use).await?;

        let working_dir = self
            .config
            .workspace_dir(workspace.company_id, &workspace.id);
        fs::create_dir_all(&working_dir)
            .map_err(|err| AppError::Io(format!("failed to create workspace dir: {err}")))?;

        let spec = ServerSpec {
            workspace_id: workspace.id.clone(),
            working_dir,
            port,
        };
        let pid = self.runtime.spawn_server(&spec).await?;

        if let Err(reason) = self.wait_until_healthy(pid, port).await {
            let stderr = self.runtime.error_output(pid).await;
            if let Err(err) = self.runtime.kill(pid).await {
                warn!(workspace_id, pid, %err, "failed to kill unhealthy preview process");
            }
            self.workspaces
                .clear_server_binding(workspace_id, WorkspaceStatus::Error)
                .await?;

            let detail = stderr.map_or_else(String::new, |out| format!("; stderr: {out}"));
            return Err(AppError::StartFailed(format!(
                "preview server for workspace {workspace_id} {reason}{detail}"
            )));
        }

        let preview_url = format!(
            "http://{}:{port}/preview/{}",
            self.config.preview.public_host, workspace.id
        );
        self.workspaces
            .record_server_binding(workspace_id, port, pid, &preview_url)
            .await?;

        info!(workspace_id, port, pid, "preview server started");
        Ok(ServerBinding {
            port,
            pid,
            preview_url,
        })
    }

    /// Stop the preview server. No-op success when nothing is recorded;
    /// "already exited" and "kill failed" both count as success so repeated
    /// stops never error, but the two cases are logged distinctly.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if clearing the binding fails.
    pub async fn stop_server(&self, workspace_id: &str) -> Result<()> {
        let workspace = self.workspaces.get_by_id(workspace_id).await?;
        let Some(pid) = workspace.preview_pid else {
            return Ok(());
        };

        match self.runtime.kill(pid).await {
            Ok(KillOutcome::Killed) => info!(workspace_id, pid, "preview server killed"),
            Ok(KillOutcome::AlreadyGone) => {
                info!(workspace_id, pid, "preview server had already exited");
            }
            Err(err) => {
                warn!(workspace_id, pid, %err, "kill signal failed; clearing binding anyway");
            }
        }

        self.workspaces
            .clear_server_binding(workspace_id, WorkspaceStatus::Initializing)
            .await
    }

    /// Dispatch a command to the workspace's preview server.
    ///
    /// # Errors
    ///
    /// - `AppError::NotRunning` if no port is recorded.
    /// - `AppError::UpstreamError` carrying the response body on a
    ///   non-success response.
    pub async fn send_command(
        &self,
        workspace_id: &str,
        command: &str,
    ) -> Result<serde_json::Value> {
        let workspace = self.workspaces.get_by_id(workspace_id).await?;
        let Some(port) = workspace.preview_port else {
            return Err(AppError::NotRunning(format!(
                "no preview server running for workspace {workspace_id}"
            )));
        };
        self.endpoint
            .send_command(port, &workspace.id, command)
            .await
    }

    /// Coarse server status for a workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the workspace does not exist.
    pub async fn server_status(&self, workspace_id: &str) -> Result<ServerStatus> {
        let workspace = self.workspaces.get_by_id(workspace_id).await?;
        let (Some(port), Some(pid)) = (workspace.preview_port, workspace.preview_pid) else {
            return Ok(ServerStatus::Stopped);
        };
        if !self.runtime.is_alive(pid).await {
            return Ok(ServerStatus::Stopped);
        }
        if self.endpoint.check_health(port).await.is_err() {
            return Ok(ServerStatus::Unhealthy);
        }
        Ok(ServerStatus::Running)
    }

    /// Stop then start the preview server, returning the new binding.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`stop_server`](Self::stop_server) and
    /// [`start_server`](Self::start_server).
    pub async fn restart_server(&self, workspace_id: &str) -> Result<ServerBinding> {
        info!(workspace_id, "restarting preview server");
        self.stop_server(workspace_id).await?;
        self.start_server(workspace_id).await
    }

    /// Retry restart with exponential backoff between attempts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RestartExhausted` naming `max_attempts` when every
    /// attempt fails; no partial process is left running (each failed start
    /// kills its own spawn).
    pub async fn auto_restart_server(
        &self,
        workspace_id: &str,
        max_attempts: u32,
    ) -> Result<ServerBinding> {
        for attempt in 1..=max_attempts {
            warn!(workspace_id, attempt, "auto-restarting preview server");
            match self.restart_server(workspace_id).await {
                Ok(binding) => return Ok(binding),
                Err(err) => {
                    warn!(workspace_id, attempt, %err, "auto-restart attempt failed");
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.backoff_delay(attempt)).await;
            }
        }
        Err(AppError::RestartExhausted(max_attempts))
    }

    /// Aggregate process liveness, endpoint reachability, and workspace
    /// file presence into a composite report.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the workspace does not exist.
    pub async fn perform_health_check(&self, workspace_id: &str) -> Result<HealthReport> {
        let workspace = self.workspaces.get_by_id(workspace_id).await?;

        let process = match workspace.preview_pid {
            None => CheckResult::unhealthy("no process id recorded"),
            Some(pid) => {
                if self.runtime.is_alive(pid).await {
                    CheckResult::healthy(format!("process {pid} is running"))
                } else {
                    CheckResult::unhealthy(format!("process {pid} not found"))
                }
            }
        };

        let endpoint = match workspace.preview_port {
            None => CheckResult::unhealthy("no port assigned"),
            Some(port) => match self.endpoint.check_health(port).await {
                Ok(()) => CheckResult::healthy("server responding normally"),
                Err(err) => CheckResult::unhealthy(format!("server not responding: {err}")),
            },
        };

        let files = self.check_workspace_files(&workspace);

        Ok(HealthReport::aggregate(
            workspace.id,
            process,
            endpoint,
            files,
        ))
    }

    /// Reuse the recorded binding when the process is alive AND healthy.
    async fn existing_healthy_binding(&self, workspace: &Workspace) -> Option<ServerBinding> {
        let (port, pid) = (workspace.preview_port?, workspace.preview_pid?);
        if !self.runtime.is_alive(pid).await {
            return None;
        }
        if self.endpoint.check_health(port).await.is_err() {
            return None;
        }
        let preview_url = workspace.preview_url.clone().unwrap_or_else(|| {
            format!(
                "http://{}:{port}/preview/{}",
                self.config.preview.public_host, workspace.id
            )
        });
        Some(ServerBinding {
            port,
            pid,
            preview_url,
        })
    }

    /// Poll process liveness then endpoint health with bounded retries.
    async fn wait_until_healthy(&self, pid: u32, port: u16) -> std::result::Result<(), String> {
        let interval = Duration::from_millis(self.config.preview.startup_poll_interval_ms);
        for _ in 0..self.config.preview.startup_max_attempts {
            if !self.runtime.is_alive(pid).await {
                return Err("exited during startup".into());
            }
            if self.endpoint.check_health(port).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
        Err(format!(
            "did not become healthy within {} attempts",
            self.config.preview.startup_max_attempts
        ))
    }

    fn check_workspace_files(&self, workspace: &Workspace) -> CheckResult {
        let dir = self
            .config
            .workspace_dir(workspace.company_id, &workspace.id);
        if !dir.is_dir() {
            return CheckResult::unhealthy("workspace directory not found");
        }
        let missing: Vec<&str> = self
            .config
            .preview
            .required_files
            .iter()
            .filter(|file| !dir.join(file.as_str()).exists())
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            CheckResult::healthy("all required files present")
        } else {
            CheckResult::unhealthy(format!("required files missing: {}", missing.join(", ")))
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.preview.restart_backoff_base_ms;
        let cap = self.config.preview.restart_backoff_cap_ms;
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(base.saturating_mul(factor).min(cap))
    }
}
