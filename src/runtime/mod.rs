//! Collaborator seams for external systems.
//!
//! Each backend the lifecycle manager touches — the local process runtime,
//! the preview server's HTTP surface, the remote task scheduler, object
//! storage, and the CDN invalidation service — sits behind a dyn-compatible
//! trait so the supervisor, orchestrator, and cleanup coordinator stay
//! independent of concrete transports. Host implementations live in the
//! sibling modules; tests supply mocks.

pub mod cache;
pub mod preview;
pub mod process;
pub mod scheduler;
pub mod storage;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Boxed future type used by all collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Local process runtime ────────────────────────────────────────────────────

/// Launch parameters for one preview server process.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    /// Workspace the process belongs to.
    pub workspace_id: String,
    /// Working directory the process starts in.
    pub working_dir: std::path::PathBuf,
    /// Port injected into the process configuration.
    pub port: u16,
}

/// Result of a forced-termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The signal was delivered and the process terminated.
    Killed,
    /// The process had already exited before the signal was sent.
    AlreadyGone,
}

/// Local OS process runtime: start a server process, observe whether a pid
/// is alive, send it a forced-termination signal.
pub trait ProcessRuntime: Send + Sync {
    /// Spawn a preview server process and return its pid.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::StartFailed`](crate::AppError::StartFailed) if the
    /// OS spawn fails.
    fn spawn_server(&self, spec: &ServerSpec) -> BoxFuture<'_, Result<u32>>;

    /// Whether the OS reports the pid as alive.
    fn is_alive(&self, pid: u32) -> BoxFuture<'_, bool>;

    /// Send a forced-termination signal to the pid.
    ///
    /// Distinguishes "already gone" from a delivered kill; both are success
    /// for idempotency.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`](crate::AppError::Io) if the signal could not
    /// be delivered for a reason other than the process being gone.
    fn kill(&self, pid: u32) -> BoxFuture<'_, Result<KillOutcome>>;

    /// Error output captured from a tracked process, for start-failure
    /// diagnostics. `None` for untracked pids.
    fn error_output(&self, pid: u32) -> BoxFuture<'_, Option<String>>;
}

// ── Preview server HTTP surface ──────────────────────────────────────────────

/// HTTP client for a preview server's health and command endpoints.
pub trait PreviewEndpoint: Send + Sync {
    /// Probe the health endpoint. `Ok(())` means a 2xx response arrived
    /// within the timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::UpstreamError`](crate::AppError::UpstreamError)
    /// when the server is unreachable or responds non-2xx.
    fn check_health(&self, port: u16) -> BoxFuture<'_, Result<()>>;

    /// Dispatch a command to the server's command endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::UpstreamError`](crate::AppError::UpstreamError)
    /// carrying the response body on a non-success response.
    fn send_command(
        &self,
        port: u16,
        workspace_id: &str,
        command: &str,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}

// ── Remote task scheduler ────────────────────────────────────────────────────

/// Run request submitted to the remote task scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct RunTaskRequest {
    /// Session the task hosts; attached as a task tag.
    pub session_id: String,
    /// Owning workspace; attached as a task tag for orphan discovery.
    pub workspace_id: String,
    /// Owning company; attached as a task tag.
    pub company_id: i64,
    /// Player cap passed to the container environment.
    pub max_players: u32,
}

/// Result of a remote task stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTaskOutcome {
    /// The scheduler accepted the stop request.
    Stopped,
    /// The task no longer exists; success for idempotency.
    AlreadyGone,
}

/// Cluster-level capacity statistics reported by the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterStats {
    /// Whether the configured cluster exists.
    pub cluster_exists: bool,
    /// Tasks currently running.
    pub running_tasks: u64,
    /// Tasks waiting for placement.
    pub pending_tasks: u64,
}

/// Remote task scheduler: run containerized workloads by request, stop them
/// by handle, and list running tasks by workspace tag.
pub trait TaskScheduler: Send + Sync {
    /// Submit a run request; returns the scheduler's task handle.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scheduler`](crate::AppError::Scheduler) on any
    /// scheduler failure (quota, configuration, transport).
    fn run_task(&self, request: &RunTaskRequest) -> BoxFuture<'_, Result<String>>;

    /// Request termination of a running task.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scheduler`](crate::AppError::Scheduler) on a hard
    /// failure; a missing task is reported as
    /// [`StopTaskOutcome::AlreadyGone`], not an error.
    fn stop_task(&self, handle: &str, reason: &str) -> BoxFuture<'_, Result<StopTaskOutcome>>;

    /// Handles of running tasks tagged with the given workspace id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scheduler`](crate::AppError::Scheduler) if the
    /// listing fails.
    fn list_tasks_for_workspace(&self, workspace_id: &str) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Cluster-level capacity statistics.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scheduler`](crate::AppError::Scheduler) if the
    /// query fails.
    fn cluster_stats(&self) -> BoxFuture<'_, Result<ClusterStats>>;
}

// ── Object storage ───────────────────────────────────────────────────────────

/// Result of purging one storage prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Objects removed.
    pub files_removed: u64,
    /// Bytes those objects occupied.
    pub bytes_freed: u64,
}

/// Object storage with named backends ("disks"); a workspace's build
/// artifacts may live on a different disk than its source tree.
pub trait ObjectStore: Send + Sync {
    /// Delete every object under `prefix` on the named disk. An absent
    /// prefix reports a zero summary.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Storage`](crate::AppError::Storage) if the disk is
    /// unknown or deletion fails partway.
    fn remove_prefix(&self, disk: &str, prefix: &str) -> BoxFuture<'_, Result<PurgeSummary>>;
}

// ── CDN cache invalidation ───────────────────────────────────────────────────

/// Status of one submitted invalidation batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvalidationStatus {
    /// Invalidation identifier.
    pub id: String,
    /// Service-reported progress state.
    pub status: String,
    /// Number of path patterns in the batch.
    pub paths_count: u32,
}

/// CDN cache invalidation service. Implementations may be disabled (no
/// distribution configured), in which case submissions return `None`.
pub trait CacheInvalidator: Send + Sync {
    /// Submit a batch of path patterns; returns the invalidation id, or
    /// `None` when the service is not configured.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Cache`](crate::AppError::Cache) if the remote call
    /// fails.
    fn invalidate(&self, paths: &[String]) -> BoxFuture<'_, Result<Option<String>>>;

    /// Look up a previously submitted invalidation.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Cache`](crate::AppError::Cache) if the query fails.
    fn invalidation_status(&self, id: &str) -> BoxFuture<'_, Result<Option<InvalidationStatus>>>;

    /// List recent invalidations, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Cache`](crate::AppError::Cache) if the query fails.
    fn list_recent(&self, max_items: u32) -> BoxFuture<'_, Result<Vec<InvalidationStatus>>>;

    /// Whether a distribution is configured at all.
    fn is_enabled(&self) -> bool;
}
