//! Catalog rows for completed backups.
//!
//! Records are created once, after an artifact is durably on disk, and never
//! mutated afterwards. All functions take a borrowed connection and run
//! inside `spawn_blocking` at the call sites.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub artifact_path: String,
    pub source_path: String,
    /// RFC3339 UTC, immutable once set.
    pub created_at: String,
    /// Size of the uncompressed source at capture time.
    pub size_bytes: i64,
    pub compressed: bool,
    /// Hex digest of the uncompressed snapshot bytes.
    pub checksum: String,
    pub schema_version: i64,
    pub entry_count: i64,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

impl BackupRecord {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Contains-match against the serialized tag list.
    pub tag: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub count: i64,
    pub total_size: i64,
    pub avg_size: f64,
    pub oldest: Option<String>,
    pub newest: Option<String>,
}

fn row_to_record(row: &Row) -> rusqlite::Result<BackupRecord> {
    let tags_raw: String = row.get("tags")?;
    Ok(BackupRecord {
        id: row.get("id")?,
        artifact_path: row.get("artifact_path")?,
        source_path: row.get("source_path")?,
        created_at: row.get("created_at")?,
        size_bytes: row.get("size_bytes")?,
        compressed: row.get("compressed")?,
        checksum: row.get("checksum")?,
        schema_version: row.get("schema_version")?,
        entry_count: row.get("entry_count")?,
        description: row.get("description")?,
        tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
    })
}

pub fn insert(conn: &Connection, record: &BackupRecord) -> Result<()> {
    let tags = serde_json::to_string(&record.tags)?;
    conn.execute(
        "INSERT INTO backups (id, artifact_path, source_path, created_at, size_bytes, compressed, checksum, schema_version, entry_count, description, tags)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.id,
            record.artifact_path,
            record.source_path,
            record.created_at,
            record.size_bytes,
            record.compressed,
            record.checksum,
            record.schema_version,
            record.entry_count,
            record.description,
            tags
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<BackupRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM backups WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_record)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

pub fn find_all(conn: &Connection) -> Result<Vec<BackupRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM backups ORDER BY created_at DESC")?;
    let rows = stmt.query_map([], row_to_record)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn list(conn: &Connection, filter: &RecordFilter) -> Result<Vec<BackupRecord>> {
    let mut sql = "SELECT * FROM backups".to_string();
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(tag) = &filter.tag {
        clauses.push("tags LIKE ?");
        args.push(Box::new(format!("%{tag}%")));
    }
    if let Some(from) = &filter.from {
        clauses.push("created_at >= ?");
        args.push(Box::new(from.to_rfc3339()));
    }
    if let Some(to) = &filter.to {
        clauses.push("created_at <= ?");
        args.push(Box::new(to.to_rfc3339()));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC");
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        args.push(Box::new(limit as i64));
    }

    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let rows = stmt.query_map(refs.as_slice(), row_to_record)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    let changes = conn.execute("DELETE FROM backups WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

pub fn aggregate(conn: &Connection) -> Result<CatalogStats> {
    let stats = conn.query_row(
        "SELECT count(*), COALESCE(SUM(size_bytes), 0), MIN(created_at), MAX(created_at) FROM backups",
        [],
        |row| {
            let count: i64 = row.get(0)?;
            let total_size: i64 = row.get(1)?;
            Ok(CatalogStats {
                count,
                total_size,
                avg_size: if count > 0 {
                    total_size as f64 / count as f64
                } else {
                    0.0
                },
                oldest: row.get(2)?,
                newest: row.get(3)?,
            })
        },
    )?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use crate::db::migrate::migrate;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn test_conn(dir: &TempDir) -> crate::db::connection::DbPool {
        let pool = create_pool(&dir.path().join("catalog.db")).unwrap();
        migrate(&pool).unwrap();
        pool
    }

    fn record(id: &str, created_at: DateTime<Utc>, tags: &[&str]) -> BackupRecord {
        BackupRecord {
            id: id.to_string(),
            artifact_path: format!("/backups/backup_{id}.db.gz"),
            source_path: "/data/kb.db".to_string(),
            created_at: created_at.to_rfc3339(),
            size_bytes: 4096,
            compressed: true,
            checksum: "ab".repeat(32),
            schema_version: 3,
            entry_count: 42,
            description: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn insert_and_find_round_trip() {
        let dir = TempDir::new().unwrap();
        let pool = test_conn(&dir);
        let conn = pool.get().unwrap();

        let rec = record("a1", at(1), &["manual", "pre-migration"]);
        insert(&conn, &rec).unwrap();

        let found = find_by_id(&conn, "a1").unwrap().unwrap();
        assert_eq!(found.id, "a1");
        assert_eq!(found.checksum, rec.checksum);
        assert_eq!(found.tags, vec!["manual", "pre-migration"]);
        assert!(found.compressed);
        assert_eq!(found.created_at_utc().unwrap(), at(1));

        assert!(find_by_id(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn list_sorts_newest_first() {
        let dir = TempDir::new().unwrap();
        let pool = test_conn(&dir);
        let conn = pool.get().unwrap();

        insert(&conn, &record("a1", at(1), &[])).unwrap();
        insert(&conn, &record("a3", at(3), &[])).unwrap();
        insert(&conn, &record("a2", at(2), &[])).unwrap();

        let all = list(&conn, &RecordFilter::default()).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a3", "a2", "a1"]);
    }

    #[test]
    fn list_filters_by_tag_contains() {
        let dir = TempDir::new().unwrap();
        let pool = test_conn(&dir);
        let conn = pool.get().unwrap();

        insert(&conn, &record("a1", at(1), &["automatic"])).unwrap();
        insert(&conn, &record("a2", at(2), &["manual"])).unwrap();

        let filter = RecordFilter {
            tag: Some("auto".into()),
            ..Default::default()
        };
        let hits = list(&conn, &filter).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a1");
    }

    #[test]
    fn list_filters_by_time_range_and_limit() {
        let dir = TempDir::new().unwrap();
        let pool = test_conn(&dir);
        let conn = pool.get().unwrap();

        for (id, day) in [("a1", 1), ("a2", 2), ("a3", 3), ("a4", 4)] {
            insert(&conn, &record(id, at(day), &[])).unwrap();
        }

        let filter = RecordFilter {
            from: Some(at(2)),
            to: Some(at(4)),
            limit: Some(2),
            ..Default::default()
        };
        let hits = list(&conn, &filter).unwrap();
        let ids: Vec<&str> = hits.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a4", "a3"]);
    }

    #[test]
    fn delete_reports_whether_a_row_went() {
        let dir = TempDir::new().unwrap();
        let pool = test_conn(&dir);
        let conn = pool.get().unwrap();

        insert(&conn, &record("a1", at(1), &[])).unwrap();
        assert!(delete(&conn, "a1").unwrap());
        assert!(!delete(&conn, "a1").unwrap());
    }

    #[test]
    fn aggregate_reports_catalog_shape() {
        let dir = TempDir::new().unwrap();
        let pool = test_conn(&dir);
        let conn = pool.get().unwrap();

        let empty = aggregate(&conn).unwrap();
        assert_eq!(empty.count, 0);
        assert_eq!(empty.avg_size, 0.0);
        assert!(empty.oldest.is_none());

        insert(&conn, &record("a1", at(1), &[])).unwrap();
        insert(&conn, &record("a2", at(5), &[])).unwrap();

        let stats = aggregate(&conn).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_size, 8192);
        assert_eq!(stats.avg_size, 4096.0);
        assert_eq!(stats.oldest, Some(at(1).to_rfc3339()));
        assert_eq!(stats.newest, Some(at(5).to_rfc3339()));
    }
}
