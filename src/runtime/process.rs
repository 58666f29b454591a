//! Host OS process runtime for preview servers.
//!
//! Spawned servers are deliberately **not** `kill_on_drop` — supervision is
//! keyed by the `{pid, port}` pair persisted on the workspace row, so a
//! restart of the manager re-derives liveness from the pid instead of from
//! in-memory state. The internal registry only adds stderr capture and
//! child reaping for processes this manager instance launched itself.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::PreviewConfig;
use crate::{AppError, Result};

use super::{BoxFuture, KillOutcome, ProcessRuntime, ServerSpec};

/// Cap on retained stderr per child; older output is discarded.
const STDERR_CAP: usize = 8 * 1024;

struct TrackedChild {
    child: Child,
    stderr_buf: Arc<StdMutex<String>>,
}

/// [`ProcessRuntime`] backed by real OS processes.
pub struct HostProcessRuntime {
    command: String,
    args: Vec<String>,
    children: Mutex<HashMap<u32, TrackedChild>>,
}

impl HostProcessRuntime {
    /// Build a runtime launching the configured preview server command.
    #[must_use]
    pub fn new(config: &PreviewConfig) -> Self {
        Self {
            command: config.server_command.clone(),
            args: config.server_args.clone(),
            children: Mutex::new(HashMap::new()),
        }
    }

    async fn spawn_inner(&self, spec: &ServerSpec) -> Result<u32> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(format!("--port={}", spec.port))
            .arg(format!("--workspace={}", spec.working_dir.display()))
            .env("PLAYHOST_WORKSPACE_ID", &spec.workspace_id)
            .env("PORT", spec.port.to_string())
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::StartFailed(format!(
                "failed to spawn preview server '{}': {err}",
                self.command
            ))
        })?;

        let pid = child.id().ok_or_else(|| {
            AppError::StartFailed("preview server exited before a pid was observed".into())
        })?;

        let stderr_buf = Arc::new(StdMutex::new(String::new()));
        if let Some(mut stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut chunk = [0u8; 1024];
                loop {
                    match stderr.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if let Ok(mut guard) = buf.lock() {
                                guard.push_str(&String::from_utf8_lossy(&chunk[..n]));
                                if guard.len() > STDERR_CAP {
                                    let excess = guard.len() - STDERR_CAP;
                                    guard.drain(..excess);
                                }
                            }
                        }
                    }
                }
            });
        }

        info!(
            workspace_id = spec.workspace_id,
            pid,
            port = spec.port,
            "preview server process spawned"
        );

        self.children
            .lock()
            .await
            .insert(pid, TrackedChild { child, stderr_buf });
        Ok(pid)
    }

    async fn is_alive_inner(&self, pid: u32) -> bool {
        let mut guard = self.children.lock().await;
        if let Some(tracked) = guard.get_mut(&pid) {
            // try_wait also reaps the child if it already exited.
            return matches!(tracked.child.try_wait(), Ok(None));
        }
        drop(guard);
        probe_pid(pid)
    }

    async fn kill_inner(&self, pid: u32) -> Result<KillOutcome> {
        let mut guard = self.children.lock().await;
        if let Some(mut tracked) = guard.remove(&pid) {
            drop(guard);
            if let Ok(Some(status)) = tracked.child.try_wait() {
                debug!(pid, ?status, "preview server already exited before kill");
                return Ok(KillOutcome::AlreadyGone);
            }
            tracked
                .child
                .kill()
                .await
                .map_err(|err| AppError::Io(format!("failed to kill pid {pid}: {err}")))?;
            return Ok(KillOutcome::Killed);
        }
        drop(guard);
        signal_kill(pid)
    }

    async fn error_output_inner(&self, pid: u32) -> Option<String> {
        let guard = self.children.lock().await;
        let tracked = guard.get(&pid)?;
        let buf = tracked.stderr_buf.lock().ok()?;
        if buf.is_empty() {
            None
        } else {
            Some(buf.clone())
        }
    }
}

impl ProcessRuntime for HostProcessRuntime {
    fn spawn_server(&self, spec: &ServerSpec) -> BoxFuture<'_, Result<u32>> {
        let spec = spec.clone();
        Box::pin(async move { self.spawn_inner(&spec).await })
    }

    fn is_alive(&self, pid: u32) -> BoxFuture<'_, bool> {
        Box::pin(self.is_alive_inner(pid))
    }

    fn kill(&self, pid: u32) -> BoxFuture<'_, Result<KillOutcome>> {
        Box::pin(self.kill_inner(pid))
    }

    fn error_output(&self, pid: u32) -> BoxFuture<'_, Option<String>> {
        Box::pin(self.error_output_inner(pid))
    }
}

/// Probe liveness of an untracked pid with signal 0.
#[cfg(unix)]
fn probe_pid(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

/// Pid probing is only implemented for unix hosts; untracked pids are
/// reported dead elsewhere.
#[cfg(not(unix))]
fn probe_pid(_pid: u32) -> bool {
    false
}

/// Force-terminate an untracked pid.
#[cfg(unix)]
fn signal_kill(pid: u32) -> Result<KillOutcome> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| AppError::Io(format!("pid out of range: {pid}")))?;
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => Ok(KillOutcome::Killed),
        Err(Errno::ESRCH) => Ok(KillOutcome::AlreadyGone),
        Err(err) => {
            warn!(pid, %err, "kill signal delivery failed");
            Err(AppError::Io(format!("failed to kill pid {pid}: {err}")))
        }
    }
}

#[cfg(not(unix))]
fn signal_kill(pid: u32) -> Result<KillOutcome> {
    Err(AppError::Io(format!(
        "forced termination of untracked pid {pid} is not supported on this platform"
    )))
}
