//! Multiplayer session orchestrator.
//!
//! Turns a workspace into a live multiplayer endpoint by launching a
//! remotely scheduled compute task, and enforces a hard time limit on that
//! task's existence. Expiry is enforced at two independent points: lazily
//! on every status read, and eagerly by the periodic sweeper. Both reuse
//! [`MultiplayerSession::is_expired`], so there is exactly one definition
//! of "expired".

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::models::session::{MultiplayerSession, SessionStatus};
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::workspace_repo::WorkspaceRepo;
use crate::runtime::{RunTaskRequest, TaskScheduler};
use crate::{AppError, Result};

/// Connection details returned from a session start.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionHandle {
    /// Session identifier.
    pub session_id: String,
    /// Externally reachable session URL.
    pub session_url: String,
    /// Hard expiration instant.
    pub expires_at: DateTime<Utc>,
}

/// Point-in-time session view returned by `get_session_status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionStatusReport {
    /// Whether the session exists at all.
    pub exists: bool,
    /// Lifecycle status; `None` when the session does not exist.
    pub status: Option<SessionStatus>,
    /// Externally reachable session URL.
    pub session_url: Option<String>,
    /// Players currently connected.
    pub current_players: u32,
    /// Player cap.
    pub max_players: u32,
    /// Seconds of lifetime left, clamped to zero.
    pub remaining_seconds: i64,
    /// Whether a new player could join right now.
    pub can_accept_players: bool,
}

impl SessionStatusReport {
    fn not_found() -> Self {
        Self {
            exists: false,
            status: None,
            session_url: None,
            current_players: 0,
            max_players: 0,
            remaining_seconds: 0,
            can_accept_players: false,
        }
    }
}

/// Counters returned by `get_session_stats`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions that are status-active and not yet expired.
    pub active_sessions: u64,
    /// Sessions created since the start of the current UTC day.
    pub total_sessions_today: u64,
    /// Sessions status-active but past expiration — sweeper backlog.
    pub expired_sessions: u64,
}

/// Orchestrates remote multiplayer session tasks for workspaces.
pub struct SessionOrchestrator {
    config: Arc<GlobalConfig>,
    sessions: SessionRepo,
    workspaces: WorkspaceRepo,
    scheduler: Arc<dyn TaskScheduler>,
}

impl SessionOrchestrator {
    /// Build an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        sessions: SessionRepo,
        workspaces: WorkspaceRepo,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> Self {
        Self {
            config,
            sessions,
            workspaces,
            scheduler,
        }
    }

    /// Start a multiplayer session for a workspace, or return the existing
    /// active, non-expired session unchanged.
    ///
    /// The session row is persisted only after the scheduler accepts the
    /// run request, so a failed start leaves nothing behind.
    ///
    /// # Errors
    ///
    /// - `AppError::UnsupportedEngine` if the engine cannot host multiplayer.
    /// - `AppError::SessionStartFailed` wrapping any scheduler failure; not
    ///   retried here because it usually reflects quota or configuration
    ///   issues upstream.
    pub async fn start_session(
        &self,
        workspace_id: &str,
        max_players: Option<u32>,
        duration_minutes: Option<i64>,
    ) -> Result<SessionHandle> {
        let workspace = self.workspaces.get_by_id(workspace_id).await?;
        if !workspace.engine_type.supports_multiplayer() {
            return Err(AppError::UnsupportedEngine(format!(
                "workspace {workspace_id} engine does not support multiplayer hosting"
            )));
        }

        let now = Utc::now();
        if let Some(existing) = self
            .sessions
            .active_unexpired_for_workspace(workspace_id, now)
            .await?
            .into_iter()
            .next()
        {
            info!(
                workspace_id,
                session_id = existing.id,
                "active session already exists; reusing"
            );
            return Ok(SessionHandle {
                session_url: existing.session_url.clone().unwrap_or_default(),
                session_id: existing.id,
                expires_at: existing.expires_at,
            });
        }

        let max_players = max_players.unwrap_or(self.config.multiplayer.default_max_players);
        let duration =
            duration_minutes.unwrap_or(self.config.multiplayer.default_duration_minutes);
        let mut session = MultiplayerSession::new(workspace_id.to_owned(), max_players, duration);

        let request = RunTaskRequest {
            session_id: session.id.clone(),
            workspace_id: workspace.id.clone(),
            company_id: workspace.company_id,
            max_players,
        };
        let task_id = self.scheduler.run_task(&request).await.map_err(|err| {
            AppError::SessionStartFailed(format!(
                "failed to start session task for workspace {workspace_id}: {err}"
            ))
        })?;

        let session_url = self.derive_session_url(&session.id);
        session.remote_task_id = Some(task_id);
        session.session_url = Some(session_url.clone());
        self.sessions.create(&session).await?;

        info!(
            workspace_id,
            session_id = session.id,
            expires_at = %session.expires_at,
            max_players,
            "multiplayer session started"
        );
        Ok(SessionHandle {
            session_id: session.id,
            session_url,
            expires_at: session.expires_at,
        })
    }

    /// Stop a session and its remote task. Returns `false` when no such
    /// session exists, `true` otherwise (including already-stopped).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Scheduler` if the remote stop hard-fails; a task
    /// that is already gone counts as success.
    pub async fn stop_session(&self, session_id: &str) -> Result<bool> {
        let Some(session) = self.sessions.get_by_id(session_id).await? else {
            return Ok(false);
        };
        if session.is_stopped() {
            return Ok(true);
        }

        if let Some(handle) = &session.remote_task_id {
            self.scheduler.stop_task(handle, "Session ended").await?;
        }
        self.sessions.mark_stopped(session_id).await?;
        info!(session_id, "multiplayer session stopped");
        Ok(true)
    }

    /// Point-in-time session view; the lazy-expiry trigger.
    ///
    /// When the expiration has passed, the remote task is stopped and the
    /// row transitioned before returning, so callers never observe a
    /// logically-expired session reported as active. If the scheduler is
    /// unreachable the row stays `active` for the sweeper to retry, but the
    /// report still presents the session as stopped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the lookup fails.
    pub async fn get_session_status(&self, session_id: &str) -> Result<SessionStatusReport> {
        let Some(session) = self.sessions.get_by_id(session_id).await? else {
            return Ok(SessionStatusReport::not_found());
        };

        let now = Utc::now();
        let mut status = session.status;
        if !session.is_stopped() && session.is_expired(now) {
            status = SessionStatus::Stopped;
            if let Err(err) = self.stop_expired(&session).await {
                warn!(
                    session_id,
                    %err,
                    "failed to stop expired session task; sweeper will retry"
                );
            }
        }

        let effective = MultiplayerSession { status, ..session };
        Ok(SessionStatusReport {
            exists: true,
            status: Some(effective.status),
            session_url: effective.session_url.clone(),
            current_players: effective.current_players,
            max_players: effective.max_players,
            remaining_seconds: effective.remaining_seconds(now),
            can_accept_players: effective.can_accept_players(now),
        })
    }

    /// Batch sweep: stop every status-active session past expiration.
    /// Returns how many sessions this pass transitioned; a concurrent pass
    /// that already claimed a session is not double-counted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the expired-session query fails. Per-session
    /// stop failures are logged and skipped, not propagated.
    pub async fn cleanup_expired_sessions(&self) -> Result<u32> {
        let now = Utc::now();
        let expired = self.sessions.list_expired_active(now).await?;
        let mut cleaned = 0u32;

        for session in expired {
            match self.stop_expired(&session).await {
                // Only the pass that performed the row transition counts the
                // session; a concurrent sweep that lost the claim does not.
                Ok(true) => cleaned += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        session_id = session.id,
                        %err,
                        "failed to stop expired session; will retry next sweep"
                    );
                }
            }
        }

        if cleaned > 0 {
            info!(count = cleaned, "cleaned up expired multiplayer sessions");
        }
        Ok(cleaned)
    }

    /// Sessions that are status-active AND not yet expired for a workspace.
    /// Expired-but-unswept rows are excluded even though their row still
    /// says `active`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_active_sessions_for_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<MultiplayerSession>> {
        self.sessions
            .active_unexpired_for_workspace(workspace_id, Utc::now())
            .await
    }

    /// Session counters, including the sweeper-backlog signal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any count query fails.
    pub async fn get_session_stats(&self) -> Result<SessionStats> {
        let now = Utc::now();
        let start_of_day = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map_or(now, |dt| dt.and_utc());

        Ok(SessionStats {
            active_sessions: self.sessions.count_active(now).await?,
            total_sessions_today: self.sessions.count_created_since(start_of_day).await?,
            expired_sessions: self.sessions.count_pending_sweep(now).await?,
        })
    }

    /// Record the connected-player count, clamped to the session cap.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn update_player_count(&self, session_id: &str, current_players: u32) -> Result<()> {
        let session = self
            .sessions
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
        let clamped = current_players.min(session.max_players);
        self.sessions.update_player_count(session_id, clamped).await
    }

    /// Stop the remote task, then claim the row transition. The claim only
    /// happens after a successful (or already-gone) task stop so a hard
    /// scheduler failure leaves the row for the next sweep. Returns whether
    /// this call performed the transition.
    async fn stop_expired(&self, session: &MultiplayerSession) -> Result<bool> {
        if let Some(handle) = &session.remote_task_id {
            self.scheduler
                .stop_task(handle, "Session expired")
                .await?;
        }
        self.sessions.mark_stopped(&session.id).await
    }

    fn derive_session_url(&self, session_id: &str) -> String {
        let label: String = session_id.chars().take(8).collect();
        format!("https://{label}.{}", self.config.multiplayer.session_domain)
    }
}
