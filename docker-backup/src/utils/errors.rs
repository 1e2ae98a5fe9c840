//! Error types for backup and restore runs.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    /// The daemon (or the backup set) has no such resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A resource with the same name already exists on the daemon.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The daemon reported nothing to do (HTTP 304), e.g. stopping a stopped container.
    #[error("Not modified: {0}")]
    NotModified(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Companion files of a record are missing from the backup set.
    #[error("Incomplete backup: {0}")]
    IncompleteBackup(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compose error: {0}")]
    Compose(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Docker error: {0}")]
    Docker(String),
}

impl BackupError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackupError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BackupError::Conflict(_))
    }
}

impl From<serde_yaml::Error> for BackupError {
    fn from(e: serde_yaml::Error) -> Self {
        BackupError::Compose(e.to_string())
    }
}

impl From<tokio::task::JoinError> for BackupError {
    fn from(e: tokio::task::JoinError) -> Self {
        BackupError::Io(std::io::Error::other(format!("blocking task failed: {e}")))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
