//! Backup-and-restore engine for the knowledge-base desktop application.
//!
//! Snapshots a live SQLite database through the online-backup API, gzips and
//! checksums the artifact, verifies round-trip integrity, tracks records in a
//! side catalog, and enforces age- and count-based retention on a timer.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod integrity;
pub mod logging;
pub mod models;
pub mod services;
pub mod snapshot;

// Re-export commonly used types
pub use config::BackupConfig;
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventBus};
pub use models::backup_record::{BackupRecord, CatalogStats, RecordFilter};
pub use services::orchestrator::{
    BackupEngine, BackupOptions, BackupResult, RestoreOptions, RestoreResult,
};
pub use services::retention::CleanupReport;
pub use services::scheduler::BackupScheduler;
