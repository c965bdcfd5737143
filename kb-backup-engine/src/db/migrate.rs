use crate::db::connection::DbPool;
use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backups (
  id TEXT PRIMARY KEY,
  artifact_path TEXT NOT NULL,
  source_path TEXT NOT NULL,
  created_at TEXT NOT NULL,
  size_bytes INTEGER NOT NULL DEFAULT 0,
  compressed INTEGER NOT NULL DEFAULT 0,
  checksum TEXT NOT NULL,
  schema_version INTEGER NOT NULL DEFAULT 0,
  entry_count INTEGER NOT NULL DEFAULT 0,
  description TEXT,
  tags TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_backups_created_at ON backups(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_backups_tags ON backups(tags);
"#;

pub fn migrate(pool: &DbPool) -> Result<()> {
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;
    tracing::debug!("[Catalog] Schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use tempfile::TempDir;

    #[test]
    fn migrate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let pool = create_pool(&dir.path().join("catalog.db")).unwrap();
        migrate(&pool).unwrap();
        migrate(&pool).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM backups", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
