//! Multiplayer session model.
//!
//! Expiry is a pure function of the stored timestamp versus the caller's
//! clock ([`MultiplayerSession::is_expired`]). The lazy read path, the
//! active-session view, and the sweeper all reuse the same predicate.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for a multiplayer session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Remote task is running and the session may accept players.
    Active,
    /// Remote task has been terminated; terminal state.
    Stopped,
}

/// Ephemeral, time-boxed multiplayer hosting instance for one workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MultiplayerSession {
    /// Unique record identifier.
    pub id: String,
    /// Owning workspace identifier.
    pub workspace_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Players currently connected.
    pub current_players: u32,
    /// Player cap for this session.
    pub max_players: u32,
    /// Handle of the remotely scheduled compute task.
    pub remote_task_id: Option<String>,
    /// Externally reachable session URL.
    pub session_url: Option<String>,
    /// Hard expiration; past this instant the session must stop.
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl MultiplayerSession {
    /// Construct a new active session with a generated identifier.
    #[must_use]
    pub fn new(workspace_id: String, max_players: u32, duration_minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id,
            status: SessionStatus::Active,
            current_players: 0,
            max_players,
            remote_task_id: None,
            session_url: None,
            expires_at: now + Duration::minutes(duration_minutes),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the session has passed its expiration at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the session has reached its terminal state.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.status == SessionStatus::Stopped
    }

    /// Seconds of lifetime left at `now`, clamped to zero.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Whether a new player could join at `now`.
    #[must_use]
    pub fn can_accept_players(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active
            && !self.is_expired(now)
            && self.current_players < self.max_players
    }
}
