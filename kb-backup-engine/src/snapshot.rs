//! Capture of the source database.
//!
//! Prefers the SQLite online-backup API, which yields a consistent snapshot
//! even while the host application is writing. When that fails the capture
//! falls back to a raw byte copy of the file, which is best-effort only and
//! logged as such.

use crate::error::{EngineError, Result};
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const PAGES_PER_STEP: std::ffi::c_int = 100;
const STEP_PAUSE: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct Snapshot {
    pub bytes: Vec<u8>,
    /// `PRAGMA user_version` of the source at capture time.
    pub schema_version: i64,
    /// Best-effort row total across user tables; 0 when unreadable.
    pub entry_count: i64,
    /// True when the online-backup API was unavailable and a raw copy was taken.
    pub raw_copy: bool,
}

pub async fn capture(source: &Path) -> Result<Snapshot> {
    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return Err(EngineError::SourceNotFound(source.to_path_buf()));
    }
    let source = source.to_path_buf();
    tokio::task::spawn_blocking(move || capture_blocking(&source)).await?
}

fn capture_blocking(source: &Path) -> Result<Snapshot> {
    match live_snapshot(source) {
        Ok(snapshot) => Ok(snapshot),
        Err(e) => {
            warn!(
                source = %source.display(),
                error = %e,
                "Online backup failed, falling back to raw copy"
            );
            raw_copy(source)
        }
    }
}

fn live_snapshot(source: &Path) -> Result<Snapshot> {
    let src = Connection::open_with_flags(source, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let scratch = tempfile::NamedTempFile::new()?;
    let mut dst = Connection::open(scratch.path())?;

    {
        let backup = Backup::new(&src, &mut dst)?;
        backup.run_to_completion(PAGES_PER_STEP, STEP_PAUSE, None)?;
    }

    // Read version and row counts from the snapshot itself, not the moving source.
    let schema_version = read_schema_version(&dst);
    let entry_count = read_entry_count(&dst);
    drop(dst);

    let bytes = std::fs::read(scratch.path())?;
    debug!(source = %source.display(), size = bytes.len(), "Captured live snapshot");
    Ok(Snapshot {
        bytes,
        schema_version,
        entry_count,
        raw_copy: false,
    })
}

/// Raw copy of the database file. Not guaranteed consistent if the source is
/// mid-write; callers get whatever bytes are on disk at this moment.
fn raw_copy(source: &Path) -> Result<Snapshot> {
    let bytes = std::fs::read(source)?;
    let (schema_version, entry_count) =
        match Connection::open_with_flags(source, OpenFlags::SQLITE_OPEN_READ_ONLY) {
            Ok(conn) => (read_schema_version(&conn), read_entry_count(&conn)),
            Err(_) => (0, 0),
        };
    Ok(Snapshot {
        bytes,
        schema_version,
        entry_count,
        raw_copy: true,
    })
}

fn read_schema_version(conn: &Connection) -> i64 {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0)
}

fn read_entry_count(conn: &Connection) -> i64 {
    let tables = match list_user_tables(conn) {
        Ok(tables) => tables,
        Err(_) => return 0,
    };

    let mut total = 0i64;
    for table in tables {
        let sql = format!("SELECT count(*) FROM \"{}\"", table.replace('"', "\"\""));
        total += conn
            .query_row(&sql, [], |row| row.get::<_, i64>(0))
            .unwrap_or(0);
    }
    total
}

fn list_user_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_source(dir: &TempDir, rows: usize) -> std::path::PathBuf {
        let path = dir.path().join("kb.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "PRAGMA user_version = 4;
             CREATE TABLE kb_entries (id INTEGER PRIMARY KEY, title TEXT NOT NULL);",
        )
        .unwrap();
        for i in 0..rows {
            conn.execute(
                "INSERT INTO kb_entries (title) VALUES (?1)",
                rusqlite::params![format!("entry {i}")],
            )
            .unwrap();
        }
        path
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        let err = capture(Path::new("/nonexistent/kb.db")).await.unwrap_err();
        assert!(matches!(err, EngineError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn captures_live_database() {
        let dir = TempDir::new().unwrap();
        let source = create_source(&dir, 3);

        let snapshot = capture(&source).await.unwrap();
        assert!(!snapshot.raw_copy);
        assert_eq!(snapshot.schema_version, 4);
        assert_eq!(snapshot.entry_count, 3);
        assert!(!snapshot.bytes.is_empty());

        // The snapshot bytes open as a database with the same rows.
        let copy = dir.path().join("snapshot.db");
        std::fs::write(&copy, &snapshot.bytes).unwrap();
        let conn = Connection::open(&copy).unwrap();
        let rows: i64 = conn
            .query_row("SELECT count(*) FROM kb_entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 3);
    }

    #[tokio::test]
    async fn empty_database_counts_zero_entries() {
        let dir = TempDir::new().unwrap();
        let source = create_source(&dir, 0);
        let snapshot = capture(&source).await.unwrap();
        assert_eq!(snapshot.entry_count, 0);
    }
}
