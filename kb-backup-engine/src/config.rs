//! Engine configuration.
//!
//! A `BackupConfig` is fixed at engine construction and never mutated
//! afterwards; per-call overrides go through `BackupOptions`/`RestoreOptions`
//! instead.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// File name of the metadata catalog inside the backup directory.
pub const CATALOG_FILE: &str = "catalog.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding artifact files and the metadata catalog.
    pub backup_path: PathBuf,

    /// Gzip artifacts on write.
    #[serde(default = "default_compression")]
    pub compression: bool,

    /// Age-based retention window.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Default scheduler interval.
    #[serde(default = "default_interval_hours")]
    pub interval_hours: f64,

    /// Verify artifacts end-to-end after write and before restore.
    #[serde(default = "default_verify_integrity")]
    pub verify_integrity: bool,

    /// Count-based retention cap.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Artifact naming template with `{timestamp}` and `{id}` placeholders.
    #[serde(default = "default_name_pattern")]
    pub name_pattern: String,
}

fn default_compression() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

fn default_interval_hours() -> f64 {
    6.0
}

fn default_verify_integrity() -> bool {
    true
}

fn default_max_backups() -> usize {
    100
}

fn default_name_pattern() -> String {
    "backup_{timestamp}_{id}".to_string()
}

impl BackupConfig {
    pub fn new(backup_path: impl Into<PathBuf>) -> Self {
        Self {
            backup_path: backup_path.into(),
            compression: default_compression(),
            retention_days: default_retention_days(),
            interval_hours: default_interval_hours(),
            verify_integrity: default_verify_integrity(),
            max_backups: default_max_backups(),
            name_pattern: default_name_pattern(),
        }
    }

    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            backup_path: PathBuf::from(
                std::env::var("BACKUP_PATH").unwrap_or_else(|_| "./backups".into()),
            ),
            compression: env_parse("BACKUP_COMPRESSION", default_compression()),
            retention_days: env_parse("BACKUP_RETENTION_DAYS", default_retention_days()),
            interval_hours: env_parse("BACKUP_INTERVAL_HOURS", default_interval_hours()),
            verify_integrity: env_parse("BACKUP_VERIFY_INTEGRITY", default_verify_integrity()),
            max_backups: env_parse("BACKUP_MAX_BACKUPS", default_max_backups()),
            name_pattern: std::env::var("BACKUP_NAME_PATTERN")
                .unwrap_or_else(|_| default_name_pattern()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backup_path.as_os_str().is_empty() {
            return Err(EngineError::Config("backup_path is required".into()));
        }
        // {id} is what keeps concurrent artifact names distinct.
        if !self.name_pattern.contains("{id}") {
            return Err(EngineError::Config(
                "name_pattern must contain the {id} placeholder".into(),
            ));
        }
        if self.interval_hours <= 0.0 {
            return Err(EngineError::Config("interval_hours must be positive".into()));
        }
        if self.max_backups == 0 {
            return Err(EngineError::Config("max_backups must be at least 1".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_hours * 3600.0)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.backup_path.join(CATALOG_FILE)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BackupConfig::new("/tmp/backups");
        assert!(config.compression);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.interval_hours, 6.0);
        assert!(config.verify_integrity);
        assert_eq!(config.max_backups, 100);
        assert_eq!(config.name_pattern, "backup_{timestamp}_{id}");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn interval_converts_hours() {
        let mut config = BackupConfig::new("/tmp/backups");
        config.interval_hours = 0.5;
        assert_eq!(config.interval(), Duration::from_secs(1800));
    }

    #[test]
    fn rejects_empty_backup_path() {
        let config = BackupConfig::new("");
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn rejects_pattern_without_id() {
        let mut config = BackupConfig::new("/tmp/backups");
        config.name_pattern = "backup_{timestamp}".into();
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn rejects_zero_max_backups() {
        let mut config = BackupConfig::new("/tmp/backups");
        config.max_backups = 0;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn catalog_lives_in_backup_dir() {
        let config = BackupConfig::new("/tmp/backups");
        assert_eq!(config.catalog_path(), PathBuf::from("/tmp/backups/catalog.db"));
    }
}
