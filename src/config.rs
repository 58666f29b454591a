//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Preview server supervision settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PreviewConfig {
    /// Binary launched as the per-workspace preview server (e.g., `node`).
    pub server_command: String,
    /// Arguments passed before the generated `--port`/`--workspace` flags.
    #[serde(default)]
    pub server_args: Vec<String>,
    /// First port considered by the allocator.
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    /// Last port considered by the allocator (inclusive).
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    /// Timeout for the port-availability probe.
    #[serde(default = "default_port_probe_timeout_ms")]
    pub port_probe_timeout_ms: u64,
    /// Timeout for a single health-endpoint request.
    #[serde(default = "default_health_timeout_seconds")]
    pub health_timeout_seconds: u64,
    /// Maximum health polls while waiting for a freshly launched server.
    #[serde(default = "default_startup_max_attempts")]
    pub startup_max_attempts: u32,
    /// Delay between startup health polls.
    #[serde(default = "default_startup_poll_interval_ms")]
    pub startup_poll_interval_ms: u64,
    /// Timeout for a command dispatch to the preview server.
    #[serde(default = "default_command_timeout_seconds")]
    pub command_timeout_seconds: u64,
    /// Maximum attempts for [`auto_restart`](crate::supervisor::server::ProcessSupervisor::auto_restart_server).
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    /// Base delay for the exponential restart backoff.
    #[serde(default = "default_restart_backoff_base_ms")]
    pub restart_backoff_base_ms: u64,
    /// Cap on a single restart backoff delay.
    #[serde(default = "default_restart_backoff_cap_ms")]
    pub restart_backoff_cap_ms: u64,
    /// Files that must exist in a workspace directory for it to be healthy.
    #[serde(default = "default_required_files")]
    pub required_files: Vec<String>,
    /// Host used when deriving preview URLs.
    #[serde(default = "default_public_host")]
    pub public_host: String,
}

fn default_port_range_start() -> u16 {
    3001
}

fn default_port_range_end() -> u16 {
    4000
}

fn default_port_probe_timeout_ms() -> u64 {
    1000
}

fn default_health_timeout_seconds() -> u64 {
    5
}

fn default_startup_max_attempts() -> u32 {
    30
}

fn default_startup_poll_interval_ms() -> u64 {
    1000
}

fn default_command_timeout_seconds() -> u64 {
    30
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_restart_backoff_base_ms() -> u64 {
    1000
}

fn default_restart_backoff_cap_ms() -> u64 {
    30_000
}

fn default_required_files() -> Vec<String> {
    vec!["package.json".into()]
}

fn default_public_host() -> String {
    "localhost".into()
}

/// Remote multiplayer task scheduling settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MultiplayerConfig {
    /// Base URL of the remote task scheduler API.
    pub scheduler_endpoint: String,
    /// Cluster the session tasks are scheduled onto.
    #[serde(default = "default_cluster")]
    pub cluster: String,
    /// Task definition submitted with each run request.
    #[serde(default = "default_task_definition")]
    pub task_definition: String,
    /// Domain under which session URLs are derived.
    #[serde(default = "default_session_domain")]
    pub session_domain: String,
    /// Default player cap when the caller does not pass one.
    #[serde(default = "default_max_players")]
    pub default_max_players: u32,
    /// Default session lifetime when the caller does not pass one.
    #[serde(default = "default_duration_minutes")]
    pub default_duration_minutes: i64,
    /// Timeout for scheduler API calls.
    #[serde(default = "default_scheduler_timeout_seconds")]
    pub scheduler_timeout_seconds: u64,
}

fn default_cluster() -> String {
    "playcanvas-multiplayer".into()
}

fn default_task_definition() -> String {
    "playcanvas-multiplayer:1".into()
}

fn default_session_domain() -> String {
    "sessions.playhost.dev".into()
}

fn default_max_players() -> u32 {
    8
}

fn default_duration_minutes() -> i64 {
    40
}

fn default_scheduler_timeout_seconds() -> u64 {
    15
}

/// Named object-storage disks and the prefixes workspaces use on them.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    /// Disk name → root directory for every configured backend.
    pub disks: HashMap<String, PathBuf>,
    /// Disk holding workspace source trees.
    #[serde(default = "default_local_disk")]
    pub workspace_disk: String,
    /// Disk holding build artifacts.
    #[serde(default = "default_local_disk")]
    pub builds_disk: String,
    /// Disk holding multiplayer session files (snapshots, saves).
    #[serde(default = "default_public_disk")]
    pub multiplayer_disk: String,
    /// Prefix under which multiplayer session files are stored.
    #[serde(default = "default_multiplayer_path")]
    pub multiplayer_path: String,
}

fn default_local_disk() -> String {
    "local".into()
}

fn default_public_disk() -> String {
    "public".into()
}

fn default_multiplayer_path() -> String {
    "multiplayer".into()
}

/// CDN cache invalidation settings. Cleanup treats an absent
/// `distribution_id` as "CDN not configured" and skips invalidation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CdnConfig {
    /// Base URL of the invalidation API.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Distribution whose cache entries are invalidated.
    #[serde(default)]
    pub distribution_id: Option<String>,
    /// Timeout for invalidation API calls.
    #[serde(default = "default_cdn_timeout_seconds")]
    pub cdn_timeout_seconds: u64,
}

fn default_cdn_timeout_seconds() -> u64 {
    10
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            distribution_id: None,
            cdn_timeout_seconds: default_cdn_timeout_seconds(),
        }
    }
}

/// Sweeper cadence and workspace age policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CleanupConfig {
    /// Age beyond which a workspace becomes a sweep candidate.
    #[serde(default = "default_workspace_max_age_hours")]
    pub workspace_max_age_hours: i64,
    /// Interval between expired-session sweeps.
    #[serde(default = "default_session_sweep_interval_seconds")]
    pub session_sweep_interval_seconds: u64,
    /// Interval between stale-workspace sweeps.
    #[serde(default = "default_workspace_sweep_interval_seconds")]
    pub workspace_sweep_interval_seconds: u64,
}

fn default_workspace_max_age_hours() -> i64 {
    24
}

fn default_session_sweep_interval_seconds() -> u64 {
    300
}

fn default_workspace_sweep_interval_seconds() -> u64 {
    3600
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            workspace_max_age_hours: default_workspace_max_age_hours(),
            session_sweep_interval_seconds: default_session_sweep_interval_seconds(),
            workspace_sweep_interval_seconds: default_workspace_sweep_interval_seconds(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root directory holding per-workspace working directories.
    pub workspace_root: PathBuf,
    /// Path of the `SQLite` database file.
    pub db_path: PathBuf,
    /// Preview server supervision settings.
    pub preview: PreviewConfig,
    /// Remote multiplayer scheduling settings.
    pub multiplayer: MultiplayerConfig,
    /// Object storage disks.
    pub storage: StorageConfig,
    /// CDN invalidation settings.
    #[serde(default)]
    pub cdn: CdnConfig,
    /// Sweeper cadence and age policy.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, parsed, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Working directory for one workspace:
    /// `{workspace_root}/{company_id}/{workspace_id}`.
    #[must_use]
    pub fn workspace_dir(&self, company_id: i64, workspace_id: &str) -> PathBuf {
        self.workspace_root
            .join(company_id.to_string())
            .join(workspace_id)
    }

    fn validate(&self) -> Result<()> {
        if self.preview.port_range_start > self.preview.port_range_end {
            return Err(AppError::Config(format!(
                "preview port range is empty: {}..={}",
                self.preview.port_range_start, self.preview.port_range_end
            )));
        }
        if self.preview.server_command.is_empty() {
            return Err(AppError::Config("preview.server_command is empty".into()));
        }
        if self.preview.startup_max_attempts == 0 {
            return Err(AppError::Config(
                "preview.startup_max_attempts must be at least 1".into(),
            ));
        }
        for disk in [
            &self.storage.workspace_disk,
            &self.storage.builds_disk,
            &self.storage.multiplayer_disk,
        ] {
            if !self.storage.disks.contains_key(disk) {
                return Err(AppError::Config(format!(
                    "storage disk '{disk}' is referenced but not defined in storage.disks"
                )));
            }
        }
        Ok(())
    }
}
