//! Shared fixtures for lifecycle integration tests.
//!
//! Provides mock implementations of every collaborator seam plus a fully
//! wired service stack over an in-memory database and tempdir-backed disks,
//! so individual test modules focus on behaviour rather than plumbing.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use playhost::cleanup::coordinator::CleanupCoordinator;
use playhost::config::GlobalConfig;
use playhost::models::session::MultiplayerSession;
use playhost::models::workspace::{EngineType, Workspace};
use playhost::multiplayer::orchestrator::SessionOrchestrator;
use playhost::persistence::session_repo::SessionRepo;
use playhost::persistence::workspace_repo::WorkspaceRepo;
use playhost::persistence::{db, SqlitePool};
use playhost::runtime::storage::LocalDiskStore;
use playhost::runtime::{
    BoxFuture, CacheInvalidator, ClusterStats, InvalidationStatus, KillOutcome, ObjectStore,
    PreviewEndpoint, ProcessRuntime, RunTaskRequest, ServerSpec, StopTaskOutcome, TaskScheduler,
};
use playhost::supervisor::server::ProcessSupervisor;
use playhost::{AppError, Result};

// ── Mock process runtime ─────────────────────────────────────────────────────

/// In-memory process runtime recording spawns and kills.
#[derive(Default)]
pub struct MockProcessRuntime {
    next_pid: AtomicU32,
    pub spawn_count: AtomicU32,
    pub fail_spawn: AtomicBool,
    alive: Mutex<HashSet<u32>>,
    pub kill_log: Mutex<Vec<u32>>,
    pub stderr: Mutex<HashMap<u32, String>>,
    pub default_stderr: Mutex<Option<String>>,
}

impl MockProcessRuntime {
    pub fn new() -> Arc<Self> {
        let runtime = Self::default();
        runtime.next_pid.store(1000, Ordering::SeqCst);
        Arc::new(runtime)
    }

    pub fn alive_pids(&self) -> HashSet<u32> {
        self.alive.lock().unwrap().clone()
    }

    pub fn mark_dead(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }
}

impl ProcessRuntime for MockProcessRuntime {
    fn spawn_server(&self, _spec: &ServerSpec) -> BoxFuture<'_, Result<u32>> {
        let result = if self.fail_spawn.load(Ordering::SeqCst) {
            Err(AppError::StartFailed("mock spawn refused".into()))
        } else {
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            self.alive.lock().unwrap().insert(pid);
            self.spawn_count.fetch_add(1, Ordering::SeqCst);
            if let Some(stderr) = self.default_stderr.lock().unwrap().clone() {
                self.stderr.lock().unwrap().insert(pid, stderr);
            }
            Ok(pid)
        };
        Box::pin(async move { result })
    }

    fn is_alive(&self, pid: u32) -> BoxFuture<'_, bool> {
        let alive = self.alive.lock().unwrap().contains(&pid);
        Box::pin(async move { alive })
    }

    fn kill(&self, pid: u32) -> BoxFuture<'_, Result<KillOutcome>> {
        self.kill_log.lock().unwrap().push(pid);
        let was_alive = self.alive.lock().unwrap().remove(&pid);
        let outcome = if was_alive {
            KillOutcome::Killed
        } else {
            KillOutcome::AlreadyGone
        };
        Box::pin(async move { Ok(outcome) })
    }

    fn error_output(&self, pid: u32) -> BoxFuture<'_, Option<String>> {
        let output = self.stderr.lock().unwrap().get(&pid).cloned();
        Box::pin(async move { output })
    }
}

// ── Mock preview endpoint ────────────────────────────────────────────────────

/// Preview endpoint whose health and command responses are scripted.
pub struct MockPreviewEndpoint {
    pub healthy: AtomicBool,
    pub fail_command: AtomicBool,
    pub command_log: Mutex<Vec<(u16, String)>>,
}

impl MockPreviewEndpoint {
    pub fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(healthy),
            fail_command: AtomicBool::new(false),
            command_log: Mutex::new(Vec::new()),
        })
    }
}

impl PreviewEndpoint for MockPreviewEndpoint {
    fn check_health(&self, _port: u16) -> BoxFuture<'_, Result<()>> {
        let healthy = self.healthy.load(Ordering::SeqCst);
        Box::pin(async move {
            if healthy {
                Ok(())
            } else {
                Err(AppError::UpstreamError("health check refused".into()))
            }
        })
    }

    fn send_command(
        &self,
        port: u16,
        _workspace_id: &str,
        command: &str,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        self.command_log
            .lock()
            .unwrap()
            .push((port, command.to_owned()));
        let fail = self.fail_command.load(Ordering::SeqCst);
        Box::pin(async move {
            if fail {
                Err(AppError::UpstreamError(
                    "preview server returned 500: mock failure body".into(),
                ))
            } else {
                Ok(serde_json::json!({ "success": true }))
            }
        })
    }
}

// ── Mock task scheduler ──────────────────────────────────────────────────────

/// Scheduler with scripted run/stop behaviour and tag-discoverable tasks.
#[derive(Default)]
pub struct MockTaskScheduler {
    next_task: AtomicU32,
    pub fail_run: AtomicBool,
    pub hard_fail_stop: AtomicBool,
    pub stopped: Mutex<Vec<String>>,
    /// Handles the scheduler reports as running for a workspace tag.
    pub tagged_tasks: Mutex<HashMap<String, Vec<String>>>,
}

impl MockTaskScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stopped_handles(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

impl TaskScheduler for MockTaskScheduler {
    fn run_task(&self, _request: &RunTaskRequest) -> BoxFuture<'_, Result<String>> {
        let result = if self.fail_run.load(Ordering::SeqCst) {
            Err(AppError::Scheduler("mock quota exceeded".into()))
        } else {
            let id = self.next_task.fetch_add(1, Ordering::SeqCst);
            Ok(format!("task-{id}"))
        };
        Box::pin(async move { result })
    }

    fn stop_task(&self, handle: &str, _reason: &str) -> BoxFuture<'_, Result<StopTaskOutcome>> {
        let result = if self.hard_fail_stop.load(Ordering::SeqCst) {
            Err(AppError::Scheduler("mock scheduler unreachable".into()))
        } else {
            let mut stopped = self.stopped.lock().unwrap();
            if stopped.iter().any(|h| h == handle) {
                Ok(StopTaskOutcome::AlreadyGone)
            } else {
                stopped.push(handle.to_owned());
                Ok(StopTaskOutcome::Stopped)
            }
        };
        Box::pin(async move { result })
    }

    fn list_tasks_for_workspace(&self, workspace_id: &str) -> BoxFuture<'_, Result<Vec<String>>> {
        let tasks = self
            .tagged_tasks
            .lock()
            .unwrap()
            .get(workspace_id)
            .cloned()
            .unwrap_or_default();
        Box::pin(async move { Ok(tasks) })
    }

    fn cluster_stats(&self) -> BoxFuture<'_, Result<ClusterStats>> {
        Box::pin(async move { Ok(ClusterStats::default()) })
    }
}

// ── Mock cache invalidator ───────────────────────────────────────────────────

/// Invalidation client that records submitted batches.
pub struct MockCacheInvalidator {
    enabled: bool,
    pub fail: AtomicBool,
    pub submitted: Mutex<Vec<Vec<String>>>,
}

impl MockCacheInvalidator {
    pub fn new(enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            enabled,
            fail: AtomicBool::new(false),
            submitted: Mutex::new(Vec::new()),
        })
    }
}

impl CacheInvalidator for MockCacheInvalidator {
    fn invalidate(&self, paths: &[String]) -> BoxFuture<'_, Result<Option<String>>> {
        let result = if !self.enabled {
            Ok(None)
        } else if self.fail.load(Ordering::SeqCst) {
            Err(AppError::Cache("mock invalidation refused".into()))
        } else {
            self.submitted.lock().unwrap().push(paths.to_vec());
            Ok(Some(format!(
                "inv-{}",
                self.submitted.lock().unwrap().len()
            )))
        };
        Box::pin(async move { result })
    }

    fn invalidation_status(&self, _id: &str) -> BoxFuture<'_, Result<Option<InvalidationStatus>>> {
        Box::pin(async move { Ok(None) })
    }

    fn list_recent(&self, _max_items: u32) -> BoxFuture<'_, Result<Vec<InvalidationStatus>>> {
        Box::pin(async move { Ok(Vec::new()) })
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ── Wired stack ──────────────────────────────────────────────────────────────

/// Everything a lifecycle test needs, wired over tempdir disks and an
/// in-memory database.
pub struct TestStack {
    pub config: Arc<GlobalConfig>,
    pub pool: Arc<SqlitePool>,
    pub workspaces: WorkspaceRepo,
    pub sessions: SessionRepo,
    pub runtime: Arc<MockProcessRuntime>,
    pub endpoint: Arc<MockPreviewEndpoint>,
    pub scheduler: Arc<MockTaskScheduler>,
    pub cache: Arc<MockCacheInvalidator>,
    pub store: Arc<LocalDiskStore>,
    pub supervisor: ProcessSupervisor,
    pub orchestrator: Arc<SessionOrchestrator>,
    pub coordinator: Arc<CleanupCoordinator>,
    /// Holds the tempdir open for the stack's lifetime.
    pub tmp: tempfile::TempDir,
}

/// Test configuration with fast timings over a tempdir.
pub fn test_config(root: &std::path::Path) -> GlobalConfig {
    let root = root.display();
    let toml = format!(
        r#"
workspace_root = '{root}/workspaces'
db_path = '{root}/playhost.db'

[preview]
server_command = "echo"
port_range_start = 3101
port_range_end = 3120
port_probe_timeout_ms = 50
health_timeout_seconds = 1
startup_max_attempts = 2
startup_poll_interval_ms = 10
command_timeout_seconds = 1
max_restart_attempts = 3
restart_backoff_base_ms = 1
restart_backoff_cap_ms = 4
required_files = ["package.json"]

[multiplayer]
scheduler_endpoint = "http://localhost:9"
session_domain = "sessions.test"

[storage]
workspace_disk = "local"
builds_disk = "local"
multiplayer_disk = "public"

[storage.disks]
local = '{root}/storage/local'
public = '{root}/storage/public'
artifacts = '{root}/storage/artifacts'

[cleanup]
workspace_max_age_hours = 24
session_sweep_interval_seconds = 1
workspace_sweep_interval_seconds = 1
"#
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// Build a fully wired stack with a healthy preview endpoint and a CDN
/// that is not configured.
pub async fn test_stack() -> TestStack {
    test_stack_with(true, false).await
}

/// Build a stack, choosing endpoint health and whether the CDN is enabled.
pub async fn test_stack_with(endpoint_healthy: bool, cdn_enabled: bool) -> TestStack {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(test_config(tmp.path()));

    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let workspaces = WorkspaceRepo::new(Arc::clone(&pool));
    let sessions = SessionRepo::new(Arc::clone(&pool));

    let runtime = MockProcessRuntime::new();
    let endpoint = MockPreviewEndpoint::new(endpoint_healthy);
    let scheduler = MockTaskScheduler::new();
    let cache = MockCacheInvalidator::new(cdn_enabled);
    let store = Arc::new(LocalDiskStore::new(&config.storage));

    let supervisor = ProcessSupervisor::new(
        Arc::clone(&config),
        workspaces.clone(),
        Arc::clone(&runtime) as Arc<dyn ProcessRuntime>,
        Arc::clone(&endpoint) as Arc<dyn PreviewEndpoint>,
    );
    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::clone(&config),
        sessions.clone(),
        workspaces.clone(),
        Arc::clone(&scheduler) as Arc<dyn TaskScheduler>,
    ));
    let coordinator = Arc::new(CleanupCoordinator::new(
        Arc::clone(&config),
        workspaces.clone(),
        sessions.clone(),
        Arc::clone(&orchestrator),
        Arc::clone(&runtime) as Arc<dyn ProcessRuntime>,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::clone(&cache) as Arc<dyn CacheInvalidator>,
        Arc::clone(&scheduler) as Arc<dyn TaskScheduler>,
    ));

    TestStack {
        config,
        pool,
        workspaces,
        sessions,
        runtime,
        endpoint,
        scheduler,
        cache,
        store,
        supervisor,
        orchestrator,
        coordinator,
        tmp,
    }
}

/// Create and persist a workspace of the given engine type.
pub async fn create_workspace(repo: &WorkspaceRepo, engine: EngineType) -> Workspace {
    let workspace = Workspace::new(7, "test-game".into(), engine);
    repo.create(&workspace).await.expect("create workspace");
    workspace
}

/// Insert a session row directly; negative durations create rows that are
/// already expired but still status-active.
pub async fn insert_session(
    repo: &SessionRepo,
    workspace_id: &str,
    duration_minutes: i64,
    task_handle: Option<&str>,
) -> MultiplayerSession {
    let mut session = MultiplayerSession::new(workspace_id.to_owned(), 8, duration_minutes);
    session.remote_task_id = task_handle.map(str::to_owned);
    session.session_url = Some(format!("https://{}.sessions.test", &session.id[..8]));
    repo.create(&session).await.expect("create session");
    session
}

/// Write a small file beneath a configured disk, creating parents.
pub fn seed_file(config: &GlobalConfig, disk: &str, relative: &str, contents: &str) {
    let root = config.storage.disks.get(disk).expect("known disk");
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdirs");
    std::fs::write(path, contents).expect("write seed file");
}
