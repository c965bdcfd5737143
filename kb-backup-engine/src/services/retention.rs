//! Age- and count-based retention.

use crate::error::Result;
use crate::events::EngineEvent;
use crate::models::backup_record::BackupRecord;
use crate::services::orchestrator::BackupEngine;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub examined: usize,
    pub deleted: usize,
    pub skipped: usize,
}

/// Ids of records expired by age or by falling outside the `max_count` most
/// recent. The rules are unioned; matching either one is enough. Pure and
/// idempotent: feeding the surviving set back in yields nothing.
pub fn find_expired(
    records: &[BackupRecord],
    retention_days: u32,
    max_count: usize,
    now: DateTime<Utc>,
) -> Vec<String> {
    let cutoff = now - Duration::days(i64::from(retention_days));

    let mut by_recency: Vec<&BackupRecord> = records.iter().collect();
    by_recency.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut expired = Vec::new();
    for (rank, record) in by_recency.iter().enumerate() {
        let too_old = record
            .created_at_utc()
            .map(|t| t < cutoff)
            .unwrap_or(false);
        if too_old || rank >= max_count {
            expired.push(record.id.clone());
        }
    }
    expired
}

/// Delete everything the policy marks as expired. A record's artifact goes
/// first; its catalog row only once the file is gone or already absent. An
/// individual failure is logged and skipped, never fatal to the batch.
pub(crate) async fn run_cleanup(engine: &BackupEngine) -> Result<CleanupReport> {
    let config = engine.config();
    let records = engine.all_records().await?;
    let expired = find_expired(
        &records,
        config.retention_days,
        config.max_backups,
        Utc::now(),
    );

    let mut deleted = 0;
    let mut skipped = 0;
    for id in &expired {
        match engine.delete_backup(id).await {
            Ok(()) => deleted += 1,
            Err(e) => {
                warn!(backup_id = %id, error = %e, "Failed to delete expired backup, skipping");
                skipped += 1;
            }
        }
    }

    if deleted > 0 || skipped > 0 {
        info!(deleted, skipped, "Retention cleanup finished");
    }
    engine
        .events()
        .emit(EngineEvent::CleanupCompleted { deleted, skipped });

    Ok(CleanupReport {
        examined: records.len(),
        deleted,
        skipped,
    })
}
