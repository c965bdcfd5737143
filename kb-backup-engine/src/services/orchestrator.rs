//! Backup orchestration: snapshot capture, compression, checksumming,
//! verification, catalog writes, and the restore counterpart.
//!
//! A failed attempt leaves nothing behind: any partially written artifact is
//! removed before the error propagates, and a record is persisted only after
//! the artifact has been verified on disk.

use crate::config::BackupConfig;
use crate::db::connection::{create_pool, DbPool};
use crate::db::migrate;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::integrity;
use crate::models::backup_record::{self, BackupRecord, CatalogStats, RecordFilter};
use crate::services::retention::{self, CleanupReport};
use crate::snapshot::{self, Snapshot};
use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-call overrides for `create_backup`. `None` falls back to the config.
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    pub compression: Option<bool>,
    pub verify: Option<bool>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub verify: Option<bool>,
    /// An existing target is refused unless this is set.
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupResult {
    pub backup_id: String,
    pub path: PathBuf,
    pub duration_ms: u64,
    pub original_size: u64,
    pub compressed_size: Option<u64>,
    pub compression_ratio: Option<f64>,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub restored_path: PathBuf,
    pub duration_ms: u64,
    pub verification_passed: bool,
}

#[derive(Clone)]
pub struct BackupEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: BackupConfig,
    db: DbPool,
    events: EventBus,
}

impl BackupEngine {
    /// Validates the config, creates the backup directory, opens the catalog
    /// and runs a startup retention pass.
    pub async fn open(config: BackupConfig, events: EventBus) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.backup_path).await?;

        let catalog_path = config.catalog_path();
        let db = tokio::task::spawn_blocking(move || -> Result<DbPool> {
            let pool = create_pool(&catalog_path)?;
            migrate::migrate(&pool)?;
            Ok(pool)
        })
        .await??;

        let engine = Self {
            inner: Arc::new(EngineInner { config, db, events }),
        };

        info!(
            backup_path = %engine.inner.config.backup_path.display(),
            "Backup engine ready"
        );
        engine.inner.events.emit(EngineEvent::Initialized {
            backup_path: engine.inner.config.backup_path.clone(),
        });

        if let Err(e) = engine.run_cleanup().await {
            warn!(error = %e, "Startup retention cleanup failed");
        }

        Ok(engine)
    }

    pub fn config(&self) -> &BackupConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// The catalog can disappear underneath a long-lived engine (backup
    /// directory wiped at runtime); every operation re-checks.
    async fn ensure_ready(&self) -> Result<()> {
        let catalog = self.inner.config.catalog_path();
        match tokio::fs::try_exists(&catalog).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(EngineError::NotInitialized(format!(
                "metadata catalog missing at {}",
                catalog.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_backup(
        &self,
        source: &Path,
        options: &BackupOptions,
    ) -> Result<BackupResult> {
        self.ensure_ready().await?;
        let started = Instant::now();

        let snapshot = match snapshot::capture(source).await {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.backup_failed(source, e)),
        };
        let checksum = integrity::checksum(&snapshot.bytes);

        self.finalize_backup(source, snapshot, checksum, options, started)
            .await
    }

    /// Steps after capture: name, compress, write, verify, persist.
    async fn finalize_backup(
        &self,
        source: &Path,
        snapshot: Snapshot,
        checksum: String,
        options: &BackupOptions,
        started: Instant,
    ) -> Result<BackupResult> {
        let config = &self.inner.config;
        let compress = options.compression.unwrap_or(config.compression);
        let verify = options.verify.unwrap_or(config.verify_integrity);

        let id = generate_backup_id();
        let created_at = Utc::now();
        let artifact_path = config
            .backup_path
            .join(artifact_name(&config.name_pattern, &id, created_at, compress));
        let original_size = snapshot.bytes.len() as u64;

        let written = match self
            .write_and_verify(&snapshot.bytes, &artifact_path, compress, verify, &checksum)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                remove_file_quiet(&artifact_path).await;
                return Err(self.backup_failed(source, e));
            }
        };

        let record = BackupRecord {
            id: id.clone(),
            artifact_path: artifact_path.to_string_lossy().into_owned(),
            source_path: source.to_string_lossy().into_owned(),
            created_at: created_at.to_rfc3339(),
            size_bytes: original_size as i64,
            compressed: compress,
            checksum: checksum.clone(),
            schema_version: snapshot.schema_version,
            entry_count: snapshot.entry_count,
            description: options.description.clone(),
            tags: options.tags.clone(),
        };

        let db = self.inner.db.clone();
        let row = record.clone();
        let persisted = tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = db.get()?;
            backup_record::insert(&conn, &row)
        })
        .await
        .map_err(EngineError::from)
        .and_then(|r| r);
        if let Err(e) = persisted {
            remove_file_quiet(&artifact_path).await;
            return Err(self.backup_failed(source, e));
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let automatic = options.tags.iter().any(|t| t == "automatic");
        info!(
            backup_id = %id,
            path = %artifact_path.display(),
            duration_ms,
            original_size,
            raw_copy = snapshot.raw_copy,
            "Backup created"
        );
        self.inner.events.emit(EngineEvent::BackupCreated {
            backup_id: id.clone(),
            path: artifact_path.clone(),
            duration_ms,
            automatic,
        });

        Ok(BackupResult {
            backup_id: id,
            path: artifact_path,
            duration_ms,
            original_size,
            compressed_size: compress.then_some(written),
            compression_ratio: if compress && original_size > 0 {
                Some(written as f64 / original_size as f64)
            } else {
                None
            },
            checksum,
        })
    }

    async fn write_and_verify(
        &self,
        bytes: &[u8],
        artifact_path: &Path,
        compress: bool,
        verify: bool,
        checksum: &str,
    ) -> Result<u64> {
        let payload = if compress {
            gzip_compress(bytes).await?
        } else {
            bytes.to_vec()
        };
        let written = payload.len() as u64;
        tokio::fs::write(artifact_path, &payload).await?;

        if verify {
            // End-to-end: read back what landed on disk, not what we meant to write.
            let stored = tokio::fs::read(artifact_path).await?;
            let restored = if compress {
                gzip_decompress(&stored).await?
            } else {
                stored
            };
            let report = integrity::verify(&restored, Some(checksum)).await?;
            if !report.valid {
                return Err(EngineError::VerificationFailed(report.errors.join("; ")));
            }
        }

        Ok(written)
    }

    fn backup_failed(&self, source: &Path, error: EngineError) -> EngineError {
        warn!(source = %source.display(), error = %error, "Backup failed");
        self.inner.events.emit(EngineEvent::BackupFailed {
            source: source.to_path_buf(),
            error: error.to_string(),
        });
        error
    }

    pub async fn restore(
        &self,
        backup_id: &str,
        target: &Path,
        options: &RestoreOptions,
    ) -> Result<RestoreResult> {
        self.ensure_ready().await?;
        let started = Instant::now();

        match self.restore_inner(backup_id, target, options, started).await {
            Ok(result) => {
                info!(
                    backup_id,
                    restored_path = %result.restored_path.display(),
                    duration_ms = result.duration_ms,
                    "Restore completed"
                );
                self.inner.events.emit(EngineEvent::RestoreCompleted {
                    backup_id: backup_id.to_string(),
                    restored_path: result.restored_path.clone(),
                    duration_ms: result.duration_ms,
                });
                Ok(result)
            }
            Err(e) => {
                warn!(backup_id, error = %e, "Restore failed");
                self.inner.events.emit(EngineEvent::RestoreFailed {
                    backup_id: backup_id.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn restore_inner(
        &self,
        backup_id: &str,
        target: &Path,
        options: &RestoreOptions,
        started: Instant,
    ) -> Result<RestoreResult> {
        let record = self
            .get_backup(backup_id)
            .await?
            .ok_or_else(|| EngineError::BackupNotFound(backup_id.to_string()))?;

        let artifact_path = PathBuf::from(&record.artifact_path);
        if !tokio::fs::try_exists(&artifact_path).await.unwrap_or(false) {
            return Err(EngineError::ArtifactMissing {
                id: record.id.clone(),
                path: artifact_path,
            });
        }
        if tokio::fs::try_exists(target).await.unwrap_or(false) && !options.overwrite {
            return Err(EngineError::TargetExists(target.to_path_buf()));
        }

        let stored = tokio::fs::read(&artifact_path).await?;
        let bytes = if record.compressed {
            gzip_decompress(&stored).await?
        } else {
            stored
        };

        let verify = options.verify.unwrap_or(self.inner.config.verify_integrity);
        let verification_passed = if verify {
            let report = integrity::verify(&bytes, Some(&record.checksum)).await?;
            if !report.valid {
                return Err(EngineError::VerificationFailed(format!(
                    "backup {}: {}",
                    record.id,
                    report.errors.join("; ")
                )));
            }
            true
        } else {
            false
        };

        tokio::fs::write(target, &bytes).await?;
        if let Err(e) = integrity::validate_file(target).await {
            remove_file_quiet(target).await;
            return Err(EngineError::CorruptRestore(format!(
                "{}: {e}",
                target.display()
            )));
        }

        Ok(RestoreResult {
            restored_path: target.to_path_buf(),
            duration_ms: started.elapsed().as_millis() as u64,
            verification_passed,
        })
    }

    pub async fn get_backup(&self, id: &str) -> Result<Option<BackupRecord>> {
        let db = self.inner.db.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<BackupRecord>> {
            let conn = db.get()?;
            backup_record::find_by_id(&conn, &id)
        })
        .await?
    }

    pub async fn list_backups(&self, filter: &RecordFilter) -> Result<Vec<BackupRecord>> {
        let db = self.inner.db.clone();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<BackupRecord>> {
            let conn = db.get()?;
            backup_record::list(&conn, &filter)
        })
        .await?
    }

    pub(crate) async fn all_records(&self) -> Result<Vec<BackupRecord>> {
        let db = self.inner.db.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<BackupRecord>> {
            let conn = db.get()?;
            backup_record::find_all(&conn)
        })
        .await?
    }

    pub async fn stats(&self) -> Result<CatalogStats> {
        let db = self.inner.db.clone();
        tokio::task::spawn_blocking(move || -> Result<CatalogStats> {
            let conn = db.get()?;
            backup_record::aggregate(&conn)
        })
        .await?
    }

    /// Deletes the artifact first; the catalog row goes only once the file
    /// is gone or confirmed already absent.
    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        self.ensure_ready().await?;
        let record = self
            .get_backup(id)
            .await?
            .ok_or_else(|| EngineError::BackupNotFound(id.to_string()))?;

        match tokio::fs::remove_file(&record.artifact_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(backup_id = %id, "Artifact already absent");
            }
            Err(e) => return Err(e.into()),
        }

        let db = self.inner.db.clone();
        let row_id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get()?;
            backup_record::delete(&conn, &row_id)
        })
        .await??;

        info!(backup_id = %id, "Backup deleted");
        self.inner.events.emit(EngineEvent::BackupDeleted {
            backup_id: id.to_string(),
        });
        Ok(())
    }

    pub async fn run_cleanup(&self) -> Result<CleanupReport> {
        retention::run_cleanup(self).await
    }

    /// Announce shutdown to observers. Idempotent; the engine itself holds
    /// no background tasks to tear down (the scheduler is stopped by its
    /// own handle).
    pub fn shutdown(&self) {
        info!("Backup engine shutting down");
        self.inner.events.emit(EngineEvent::Shutdown);
    }
}

/// Hash of the capture instant plus randomness, truncated to 16 hex chars.
fn generate_backup_id() -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_be_bytes(),
    );
    hasher.update(Uuid::new_v4().as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

fn artifact_name(pattern: &str, id: &str, created_at: DateTime<Utc>, compressed: bool) -> String {
    let timestamp = created_at.format("%Y%m%d_%H%M%S").to_string();
    let stem = pattern
        .replace("{timestamp}", &timestamp)
        .replace("{id}", id);
    if compressed {
        format!("{stem}.db.gz")
    } else {
        format!("{stem}.db")
    }
}

async fn gzip_compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzipEncoder::new(Cursor::new(Vec::new()));
    encoder.write_all(bytes).await?;
    encoder.shutdown().await?;
    Ok(encoder.into_inner().into_inner())
}

async fn gzip_decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzipDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).await?;
    Ok(out)
}

async fn remove_file_quiet(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial file");
        }
    }
}
