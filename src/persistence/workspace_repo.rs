//! Workspace repository for `SQLite` persistence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::workspace::{EngineType, Workspace, WorkspaceStatus};
use crate::{AppError, Result};

use super::SqlitePool;

/// Repository wrapper around `SQLite` for workspace records.
#[derive(Clone)]
pub struct WorkspaceRepo {
    db: Arc<SqlitePool>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: String,
    company_id: i64,
    name: String,
    engine_type: String,
    status: String,
    preview_port: Option<i64>,
    preview_pid: Option<i64>,
    preview_url: Option<String>,
    published_url: Option<String>,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl WorkspaceRow {
    /// Convert a database row into the domain model.
    fn into_workspace(self) -> Result<Workspace> {
        let engine_type = parse_engine_type(&self.engine_type)?;
        let status = parse_workspace_status(&self.status)?;
        let preview_port = self
            .preview_port
            .map(|port| {
                u16::try_from(port).map_err(|_| AppError::Db(format!("invalid port: {port}")))
            })
            .transpose()?;
        let preview_pid = self
            .preview_pid
            .map(|pid| u32::try_from(pid).map_err(|_| AppError::Db(format!("invalid pid: {pid}"))))
            .transpose()?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&self.metadata)
            .map_err(|err| AppError::Db(format!("invalid metadata json: {err}")))?;

        Ok(Workspace {
            id: self.id,
            company_id: self.company_id,
            name: self.name,
            engine_type,
            status,
            preview_port,
            preview_pid,
            preview_url: self.preview_url,
            published_url: self.published_url,
            metadata,
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

fn parse_engine_type(s: &str) -> Result<EngineType> {
    match s {
        "playcanvas" => Ok(EngineType::Playcanvas),
        "unreal" => Ok(EngineType::Unreal),
        "gdevelop" => Ok(EngineType::Gdevelop),
        other => Err(AppError::Db(format!("invalid engine_type: {other}"))),
    }
}

fn engine_type_str(e: EngineType) -> &'static str {
    match e {
        EngineType::Playcanvas => "playcanvas",
        EngineType::Unreal => "unreal",
        EngineType::Gdevelop => "gdevelop",
    }
}

fn parse_workspace_status(s: &str) -> Result<WorkspaceStatus> {
    match s {
        "initializing" => Ok(WorkspaceStatus::Initializing),
        "ready" => Ok(WorkspaceStatus::Ready),
        "error" => Ok(WorkspaceStatus::Error),
        "published" => Ok(WorkspaceStatus::Published),
        other => Err(AppError::Db(format!("invalid workspace status: {other}"))),
    }
}

fn workspace_status_str(s: WorkspaceStatus) -> &'static str {
    match s {
        WorkspaceStatus::Initializing => "initializing",
        WorkspaceStatus::Ready => "ready",
        WorkspaceStatus::Error => "error",
        WorkspaceStatus::Published => "published",
    }
}

impl WorkspaceRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new workspace record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, workspace: &Workspace) -> Result<()> {
        let metadata = serde_json::to_string(&workspace.metadata)
            .map_err(|err| AppError::Db(format!("failed to encode metadata: {err}")))?;

        sqlx::query(
            "INSERT INTO workspace (id, company_id, name, engine_type, status, preview_port,
             preview_pid, preview_url, published_url, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&workspace.id)
        .bind(workspace.company_id)
        .bind(&workspace.name)
        .bind(engine_type_str(workspace.engine_type))
        .bind(workspace_status_str(workspace.status))
        .bind(workspace.preview_port.map(i64::from))
        .bind(workspace.preview_pid.map(i64::from))
        .bind(&workspace.preview_url)
        .bind(&workspace.published_url)
        .bind(metadata)
        .bind(workspace.created_at.to_rfc3339())
        .bind(workspace.updated_at.to_rfc3339())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Retrieve a workspace by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the workspace does not exist.
    pub async fn get_by_id(&self, id: &str) -> Result<Workspace> {
        let row: Option<WorkspaceRow> = sqlx::query_as("SELECT * FROM workspace WHERE id = ?1")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        row.ok_or_else(|| AppError::NotFound(format!("workspace {id} not found")))?
            .into_workspace()
    }

    /// Record a healthy preview server binding and mark the workspace ready.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_server_binding(
        &self,
        id: &str,
        port: u16,
        pid: u32,
        preview_url: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE workspace SET preview_port = ?2, preview_pid = ?3, preview_url = ?4,
             status = 'ready', updated_at = ?5 WHERE id = ?1",
        )
        .bind(id)
        .bind(i64::from(port))
        .bind(i64::from(pid))
        .bind(preview_url)
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Clear the preview server binding and set the given status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn clear_server_binding(&self, id: &str, status: WorkspaceStatus) -> Result<()> {
        sqlx::query(
            "UPDATE workspace SET preview_port = NULL, preview_pid = NULL, preview_url = NULL,
             status = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(workspace_status_str(status))
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Update only the lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_status(&self, id: &str, status: WorkspaceStatus) -> Result<()> {
        sqlx::query("UPDATE workspace SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(workspace_status_str(status))
            .bind(Utc::now().to_rfc3339())
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Replace the metadata map.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_metadata(
        &self,
        id: &str,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let encoded = serde_json::to_string(metadata)
            .map_err(|err| AppError::Db(format!("failed to encode metadata: {err}")))?;
        sqlx::query("UPDATE workspace SET metadata = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(encoded)
            .bind(Utc::now().to_rfc3339())
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Ports currently assigned to any workspace. The allocator derives its
    /// in-use set from this query on every call rather than caching it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_assigned_ports(&self) -> Result<Vec<u16>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT preview_port FROM workspace WHERE preview_port IS NOT NULL")
                .fetch_all(&*self.db)
                .await?;
        rows.into_iter()
            .map(|(port,)| {
                u16::try_from(port).map_err(|_| AppError::Db(format!("invalid port: {port}")))
            })
            .collect()
    }

    /// Workspaces that currently record a supervised process binding.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_with_bindings(&self) -> Result<Vec<Workspace>> {
        let rows: Vec<WorkspaceRow> =
            sqlx::query_as("SELECT * FROM workspace WHERE preview_pid IS NOT NULL")
                .fetch_all(&*self.db)
                .await?;
        rows.into_iter().map(WorkspaceRow::into_workspace).collect()
    }

    /// List workspaces created before `cutoff`, optionally filtered by
    /// engine type.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_older_than(
        &self,
        cutoff: DateTime<Utc>,
        engine_type: Option<EngineType>,
    ) -> Result<Vec<Workspace>> {
        let rows: Vec<WorkspaceRow> = if let Some(engine) = engine_type {
            sqlx::query_as(
                "SELECT * FROM workspace WHERE created_at < ?1 AND engine_type = ?2
                 ORDER BY created_at ASC",
            )
            .bind(cutoff.to_rfc3339())
            .bind(engine_type_str(engine))
            .fetch_all(&*self.db)
            .await?
        } else {
            sqlx::query_as("SELECT * FROM workspace WHERE created_at < ?1 ORDER BY created_at ASC")
                .bind(cutoff.to_rfc3339())
                .fetch_all(&*self.db)
                .await?
        };
        rows.into_iter().map(WorkspaceRow::into_workspace).collect()
    }

    /// Count all workspaces.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workspace")
            .fetch_one(&*self.db)
            .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Count workspaces created before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workspace WHERE created_at < ?1")
            .bind(cutoff.to_rfc3339())
            .fetch_one(&*self.db)
            .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Delete a workspace row. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workspace WHERE id = ?1")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
