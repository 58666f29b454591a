//! Cleanup result records.
//!
//! Never persisted; returned for observability and test assertions only.
//! Sub-step failures inside cleanup are swallowed and logged, so these
//! records are not used for control flow.

use serde::Serialize;

/// Aggregate result of one `cleanup_workspace` run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Whether the operation ran to completion (including the final row
    /// deletion). Individual sub-step failures do not clear this flag.
    pub success: bool,
    /// Sessions whose remote task stop succeeded during this run.
    pub sessions_terminated: u32,
    /// Storage objects removed across all disks.
    pub files_cleaned: u64,
    /// Bytes of storage freed across all disks.
    pub storage_freed_bytes: u64,
    /// CDN path patterns submitted for invalidation.
    pub cache_paths_cleaned: u32,
    /// Remote tasks stopped by the reclamation step (per-session handles
    /// plus tag-discovered orphans).
    pub remote_tasks_stopped: u32,
    /// Error detail when the run did not complete.
    pub error: Option<String>,
}

/// Counters reported by `get_cleanup_stats`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CleanupStats {
    /// Workspaces currently persisted.
    pub total_workspaces: u64,
    /// Workspaces older than the configured age threshold.
    pub old_workspaces: u64,
    /// Sessions that are status-active and not yet expired.
    pub active_sessions: u64,
    /// Sessions that are status-active but past expiration (pending sweep).
    pub expired_sessions: u64,
}

/// Render a byte count in a human-readable unit for log lines.
#[must_use]
#[allow(clippy::cast_precision_loss)] // log-line rendering only
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value > 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
