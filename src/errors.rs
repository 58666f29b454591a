//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Operation requested against a workspace whose engine type does not
    /// support it.
    UnsupportedEngine(String),
    /// No free port remains in the configured allocation range.
    ResourceExhausted(String),
    /// Preview server launch failed or never became healthy.
    StartFailed(String),
    /// Auto-restart gave up after the configured number of attempts.
    RestartExhausted(u32),
    /// Command sent to a workspace with no running preview server.
    NotRunning(String),
    /// A running process or service returned a non-success response.
    UpstreamError(String),
    /// Remote multiplayer task launch failed.
    SessionStartFailed(String),
    /// Remote task scheduler call failure.
    Scheduler(String),
    /// Object storage backend failure.
    Storage(String),
    /// CDN cache invalidation service failure.
    Cache(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::UnsupportedEngine(msg) => write!(f, "unsupported engine: {msg}"),
            Self::ResourceExhausted(msg) => write!(f, "resource exhausted: {msg}"),
            Self::StartFailed(msg) => write!(f, "start failed: {msg}"),
            Self::RestartExhausted(attempts) => {
                write!(f, "restart exhausted after {attempts} attempts")
            }
            Self::NotRunning(msg) => write!(f, "not running: {msg}"),
            Self::UpstreamError(msg) => write!(f, "upstream error: {msg}"),
            Self::SessionStartFailed(msg) => write!(f, "session start failed: {msg}"),
            Self::Scheduler(msg) => write!(f, "scheduler: {msg}"),
            Self::Storage(msg) => write!(f, "storage: {msg}"),
            Self::Cache(msg) => write!(f, "cache: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}
