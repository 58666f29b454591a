//! Best-effort workspace resource cleanup.
//!
//! Every backend a workspace may have touched — remote session tasks, the
//! local preview process, object storage, the CDN cache — is released by a
//! [`CleanupStep`] behind one common capability: attempt to release, report
//! counts, never throw. The coordinator iterates the step list uniformly;
//! a new backend is added by implementing the trait, not by branching
//! inside the coordinator.

pub mod coordinator;
pub mod steps;

use crate::models::session::MultiplayerSession;
use crate::models::workspace::Workspace;
use crate::runtime::BoxFuture;

/// Everything a step may need: the workspace under teardown and its
/// sessions as loaded at the start of the run.
#[derive(Debug, Clone)]
pub struct CleanupContext {
    /// Workspace being torn down.
    pub workspace: Workspace,
    /// All of its sessions (any status), loaded once before the steps run.
    pub sessions: Vec<MultiplayerSession>,
}

/// Counters one step contributes to the aggregate outcome. Steps fill only
/// the fields they own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Sessions whose remote task stop succeeded.
    pub sessions_terminated: u32,
    /// Storage objects removed.
    pub files_cleaned: u64,
    /// Bytes of storage freed.
    pub storage_freed_bytes: u64,
    /// CDN path patterns submitted for invalidation.
    pub cache_paths_cleaned: u32,
    /// Remote tasks stopped.
    pub remote_tasks_stopped: u32,
}

/// One resource-release capability. Implementations check whether their
/// target still exists before acting, so re-running cleanup is safe, and
/// they swallow and log their own failures.
pub trait CleanupStep: Send + Sync {
    /// Step name for log context.
    fn name(&self) -> &'static str;

    /// Attempt to release this step's resources for the workspace.
    fn run<'a>(&'a self, ctx: &'a CleanupContext) -> BoxFuture<'a, StepReport>;
}
