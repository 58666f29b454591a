//! Composite health report for a supervised preview server.

use serde::Serialize;

/// Outcome of a single health dimension.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// The dimension passed.
    Healthy,
    /// The dimension failed.
    Unhealthy,
}

/// One health dimension with operator-facing detail.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckResult {
    /// Pass/fail for this dimension.
    pub status: CheckStatus,
    /// Human-readable explanation.
    pub message: String,
}

impl CheckResult {
    /// A passing check.
    #[must_use]
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Healthy,
            message: message.into(),
        }
    }

    /// A failing check.
    #[must_use]
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Unhealthy,
            message: message.into(),
        }
    }
}

/// Aggregate verdict across all dimensions.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    /// Every dimension passed.
    Healthy,
    /// Some dimensions failed.
    Degraded,
    /// Every dimension failed.
    Unhealthy,
}

/// Composite health report: process liveness, health-endpoint
/// reachability, and presence of expected workspace files.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    /// Workspace the report describes.
    pub workspace_id: String,
    /// Aggregate verdict.
    pub overall: OverallHealth,
    /// OS process liveness.
    pub process: CheckResult,
    /// Health-endpoint reachability.
    pub endpoint: CheckResult,
    /// Required files present on disk.
    pub files: CheckResult,
}

impl HealthReport {
    /// Aggregate three dimension results into a report.
    #[must_use]
    pub fn aggregate(
        workspace_id: String,
        process: CheckResult,
        endpoint: CheckResult,
        files: CheckResult,
    ) -> Self {
        let failed = [&process, &endpoint, &files]
            .iter()
            .filter(|check| check.status == CheckStatus::Unhealthy)
            .count();
        let overall = match failed {
            0 => OverallHealth::Healthy,
            3 => OverallHealth::Unhealthy,
            _ => OverallHealth::Degraded,
        };
        Self {
            workspace_id,
            overall,
            process,
            endpoint,
            files,
        }
    }
}
