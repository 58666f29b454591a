//! Workspace model and engine capability helpers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Game engine a workspace is built on.
///
/// Engine type is immutable after workspace creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    /// Browser engine with a live-preview server and multiplayer hosting.
    Playcanvas,
    /// Desktop engine; builds are exported, no live preview.
    Unreal,
    /// Browser engine rendered through exported builds only.
    Gdevelop,
}

impl EngineType {
    /// Whether this engine needs a supervised local preview server.
    #[must_use]
    pub fn supports_live_preview(self) -> bool {
        matches!(self, Self::Playcanvas)
    }

    /// Whether this engine can host multiplayer sessions.
    #[must_use]
    pub fn supports_multiplayer(self) -> bool {
        matches!(self, Self::Playcanvas)
    }
}

/// Workspace lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    /// Provisioned but no healthy preview server yet.
    Initializing,
    /// Preview server healthy; port and pid are recorded.
    Ready,
    /// Last start attempt failed; diagnostic detail is in the logs.
    Error,
    /// Published to a public URL.
    Published,
}

/// Per-user development sandbox tied to one engine and one template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Workspace {
    /// Unique record identifier.
    pub id: String,
    /// Owning company identifier.
    pub company_id: i64,
    /// Display name.
    pub name: String,
    /// Engine the workspace targets; immutable after creation.
    pub engine_type: EngineType,
    /// Current lifecycle status.
    pub status: WorkspaceStatus,
    /// Port of the supervised preview server, when one is running.
    pub preview_port: Option<u16>,
    /// OS process id of the supervised preview server.
    pub preview_pid: Option<u32>,
    /// Externally reachable preview URL.
    pub preview_url: Option<String>,
    /// Public URL when the workspace has been published.
    pub published_url: Option<String>,
    /// Free-form derived facts (latest build path, build disk, …).
    pub metadata: HashMap<String, serde_json::Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Metadata key recording the most recent build-artifact prefix.
pub const META_LATEST_BUILD_PATH: &str = "latest_build_path";
/// Metadata key recording which disk holds the latest build.
pub const META_BUILD_STORAGE_DISK: &str = "build_storage_disk";

impl Workspace {
    /// Construct a new workspace with defaults and generated identifier.
    #[must_use]
    pub fn new(company_id: i64, name: String, engine_type: EngineType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            company_id,
            name,
            engine_type,
            status: WorkspaceStatus::Initializing,
            preview_port: None,
            preview_pid: None,
            preview_url: None,
            published_url: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the workspace reports a healthy preview server.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == WorkspaceStatus::Ready
    }

    /// Base URL of the supervised preview server, when a port is recorded.
    #[must_use]
    pub fn server_url(&self) -> Option<String> {
        self.preview_port
            .map(|port| format!("http://localhost:{port}"))
    }

    /// Object-storage prefix holding the workspace source tree.
    #[must_use]
    pub fn storage_prefix(&self) -> String {
        format!("workspaces/{}/{}", self.company_id, self.id)
    }

    /// Object-storage prefix holding the workspace build artifacts.
    #[must_use]
    pub fn builds_prefix(&self) -> String {
        format!("builds/{}/{}", self.company_id, self.id)
    }

    /// Latest build-artifact prefix recorded by a build operation, if any.
    #[must_use]
    pub fn latest_build_path(&self) -> Option<&str> {
        self.metadata
            .get(META_LATEST_BUILD_PATH)
            .and_then(serde_json::Value::as_str)
    }

    /// Disk the latest build was written to, when a build recorded one.
    #[must_use]
    pub fn build_storage_disk(&self) -> Option<&str> {
        self.metadata
            .get(META_BUILD_STORAGE_DISK)
            .and_then(serde_json::Value::as_str)
    }
}
