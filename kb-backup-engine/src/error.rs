//! Typed errors for the backup engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("source database not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("artifact for backup {id} missing at {path}")]
    ArtifactMissing { id: String, path: PathBuf },

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("restored database failed validation: {0}")]
    CorruptRestore(String),

    #[error("target already exists: {0}")]
    TargetExists(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("engine not initialized: {0}")]
    NotInitialized(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("catalog pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
