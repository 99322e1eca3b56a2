use std::path::PathBuf;

/// Errors produced while running an install or rollback action.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A cancellation was requested and observed at a checkpoint.
    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A migration script failed; its version was not recorded.
    #[error("script '{script}' of version '{version}' failed: {source}")]
    Script {
        version: String,
        script: String,
        source: rusqlite::Error,
    },

    /// The migration source directory could not be read.
    #[error("failed to read migration sources at {}: {source}", .path.display())]
    Sources {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Migration sources or bookkeeping are inconsistent.
    #[error("invalid migration layout: {0}")]
    Layout(String),

    #[error("unknown target version '{0}'")]
    UnknownVersion(String),

    /// A blocking database task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to encode migration log: {0}")]
    Log(#[from] serde_json::Error),
}

impl RunnerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunnerError::Cancelled)
    }
}

/// Fatal configuration problems detected before any action runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Wrong value DATABASE_FILE: '{0}'.")]
    InvalidDatabaseFile(String),

    #[error("Unsupported action: '{0}'.")]
    UnsupportedAction(String),
}
