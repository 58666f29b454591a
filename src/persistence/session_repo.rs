//! Multiplayer session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::session::{MultiplayerSession, SessionStatus};
use crate::{AppError, Result};

use super::SqlitePool;

/// Repository wrapper around `SQLite` for multiplayer session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<SqlitePool>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    workspace_id: String,
    status: String,
    current_players: i64,
    max_players: i64,
    remote_task_id: Option<String>,
    session_url: Option<String>,
    expires_at: String,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    /// Convert a database row into the domain model.
    fn into_session(self) -> Result<MultiplayerSession> {
        let status = parse_session_status(&self.status)?;
        let current_players = u32::try_from(self.current_players)
            .map_err(|_| AppError::Db(format!("invalid current_players: {}", self.current_players)))?;
        let max_players = u32::try_from(self.max_players)
            .map_err(|_| AppError::Db(format!("invalid max_players: {}", self.max_players)))?;

        Ok(MultiplayerSession {
            id: self.id,
            workspace_id: self.workspace_id,
            status,
            current_players,
            max_players,
            remote_task_id: self.remote_task_id,
            session_url: self.session_url,
            expires_at: parse_timestamp(&self.expires_at, "expires_at")?,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

fn parse_timestamp(s: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| AppError::Db(format!("invalid {field}: {err}")))
}

fn parse_session_status(s: &str) -> Result<SessionStatus> {
    match s {
        "active" => Ok(SessionStatus::Active),
        "stopped" => Ok(SessionStatus::Stopped),
        other => Err(AppError::Db(format!("invalid session status: {other}"))),
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, session: &MultiplayerSession) -> Result<()> {
        let status = match session.status {
            SessionStatus::Active => "active",
            SessionStatus::Stopped => "stopped",
        };
        sqlx::query(
            "INSERT INTO multiplayer_session (id, workspace_id, status, current_players,
             max_players, remote_task_id, session_url, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&session.id)
        .bind(&session.workspace_id)
        .bind(status)
        .bind(i64::from(session.current_players))
        .bind(i64::from(session.max_players))
        .bind(&session.remote_task_id)
        .bind(&session.session_url)
        .bind(session.expires_at.to_rfc3339())
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Retrieve a session by identifier, if it exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<MultiplayerSession>> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM multiplayer_session WHERE id = ?1")
                .bind(id)
                .fetch_optional(&*self.db)
                .await?;
        row.map(SessionRow::into_session).transpose()
    }

    /// All sessions belonging to a workspace, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_workspace(&self, workspace_id: &str) -> Result<Vec<MultiplayerSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM multiplayer_session WHERE workspace_id = ?1 ORDER BY created_at DESC",
        )
        .bind(workspace_id)
        .fetch_all(&*self.db)
        .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Sessions that are status-active AND not yet expired at `now`.
    ///
    /// Expired-but-unswept rows are excluded even though they still read
    /// `active` — "active" here means both status-active and unexpired.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn active_unexpired_for_workspace(
        &self,
        workspace_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<MultiplayerSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM multiplayer_session
             WHERE workspace_id = ?1 AND status = 'active' AND expires_at > ?2
             ORDER BY created_at DESC",
        )
        .bind(workspace_id)
        .bind(now.to_rfc3339())
        .fetch_all(&*self.db)
        .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Sessions that are status-active but past expiration at `now`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_expired_active(&self, now: DateTime<Utc>) -> Result<Vec<MultiplayerSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM multiplayer_session
             WHERE status = 'active' AND expires_at <= ?1",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&*self.db)
        .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Transition a session to `stopped`. Returns `true` only when this call
    /// performed the transition, so concurrent sweeps cannot double-count.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_stopped(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE multiplayer_session SET status = 'stopped', updated_at = ?2
             WHERE id = ?1 AND status = 'active'",
        )
        .bind(id)
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Update the connected-player count.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_player_count(&self, id: &str, current_players: u32) -> Result<()> {
        sqlx::query(
            "UPDATE multiplayer_session SET current_players = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(i64::from(current_players))
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Count sessions that are status-active and not yet expired at `now`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_active(&self, now: DateTime<Utc>) -> Result<u64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM multiplayer_session
             WHERE status = 'active' AND expires_at > ?1",
        )
        .bind(now.to_rfc3339())
        .fetch_one(&*self.db)
        .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Count sessions created at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM multiplayer_session WHERE created_at >= ?1")
                .bind(since.to_rfc3339())
                .fetch_one(&*self.db)
                .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Count sessions that are status-active but already past expiration —
    /// work the sweeper has not picked up yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_pending_sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM multiplayer_session
             WHERE status = 'active' AND expires_at <= ?1",
        )
        .bind(now.to_rfc3339())
        .fetch_one(&*self.db)
        .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Delete all session rows for a workspace. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_for_workspace(&self, workspace_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM multiplayer_session WHERE workspace_id = ?1")
            .bind(workspace_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
