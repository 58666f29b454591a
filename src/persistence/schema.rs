//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every server startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS workspace (
    id              TEXT PRIMARY KEY NOT NULL,
    company_id      INTEGER NOT NULL,
    name            TEXT NOT NULL,
    engine_type     TEXT NOT NULL CHECK(engine_type IN ('playcanvas','unreal','gdevelop')),
    status          TEXT NOT NULL CHECK(status IN ('initializing','ready','error','published')),
    preview_port    INTEGER,
    preview_pid     INTEGER,
    preview_url     TEXT,
    published_url   TEXT,
    metadata        TEXT NOT NULL DEFAULT '{}',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS multiplayer_session (
    id              TEXT PRIMARY KEY NOT NULL,
    workspace_id    TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('active','stopped')),
    current_players INTEGER NOT NULL DEFAULT 0,
    max_players     INTEGER NOT NULL,
    remote_task_id  TEXT,
    session_url     TEXT,
    expires_at      TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workspace_company ON workspace(company_id);
CREATE INDEX IF NOT EXISTS idx_workspace_created ON workspace(created_at);
CREATE INDEX IF NOT EXISTS idx_session_workspace ON multiplayer_session(workspace_id);
CREATE INDEX IF NOT EXISTS idx_session_status_expiry ON multiplayer_session(status, expires_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
