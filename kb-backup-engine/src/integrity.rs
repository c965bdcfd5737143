//! Content checksums and structural validation of snapshot bytes.
//!
//! Verification is a dual check: the digest comparison catches bytes that
//! changed in transit, the structural probe catches blobs that are not a
//! database at all (or no longer open as one). Checksums are always computed
//! over the *uncompressed* snapshot so verification is compression-agnostic.

use crate::error::Result;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

/// sha256 hex digest of the given bytes. Pure and deterministic.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub digest: String,
    pub corruption_detected: bool,
    pub errors: Vec<String>,
}

/// Check the bytes against an expected digest (when given) and probe that
/// they open as a well-formed SQLite database. `valid` requires both.
pub async fn verify(bytes: &[u8], expected: Option<&str>) -> Result<VerifyReport> {
    let digest = checksum(bytes);
    let mut errors = Vec::new();
    let mut valid = true;

    if let Some(expected) = expected {
        if expected != digest {
            valid = false;
            errors.push("checksum mismatch".to_string());
        }
    }

    let owned = bytes.to_vec();
    let probe = tokio::task::spawn_blocking(move || probe_bytes(&owned)).await?;
    let corruption_detected = match probe {
        Ok(()) => false,
        Err(e) => {
            errors.push(format!("structural check failed: {e}"));
            true
        }
    };
    if corruption_detected {
        valid = false;
    }

    Ok(VerifyReport {
        valid,
        digest,
        corruption_detected,
        errors,
    })
}

/// Structural probe of a database file already on disk, used for
/// post-restore sanity checks.
pub async fn validate_file(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || probe_file(&path)).await?
}

/// Write the bytes to a scratch file and probe that. The scratch file is
/// dropped, and therefore removed, on every exit path.
fn probe_bytes(bytes: &[u8]) -> Result<()> {
    let mut scratch = tempfile::NamedTempFile::new()?;
    scratch.write_all(bytes)?;
    scratch.flush()?;
    probe_file(scratch.path())
}

/// Open read-only and issue a trivial query against the schema catalog.
fn probe_file(path: &Path) -> Result<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db_bytes() -> Vec<u8> {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE kb_entries (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
             INSERT INTO kb_entries (title) VALUES ('vsam status 37');",
        )
        .unwrap();
        drop(conn);
        std::fs::read(file.path()).unwrap()
    }

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(checksum(b"abc"), checksum(b"abc"));
        assert_ne!(checksum(b"abc"), checksum(b"abd"));
        assert_eq!(checksum(b"").len(), 64);
    }

    #[tokio::test]
    async fn accepts_valid_database_with_matching_digest() {
        let bytes = sample_db_bytes();
        let digest = checksum(&bytes);
        let report = verify(&bytes, Some(&digest)).await.unwrap();
        assert!(report.valid);
        assert!(!report.corruption_detected);
        assert!(report.errors.is_empty());
        assert_eq!(report.digest, digest);
    }

    #[tokio::test]
    async fn structural_check_runs_without_expected_digest() {
        let bytes = sample_db_bytes();
        let report = verify(&bytes, None).await.unwrap();
        assert!(report.valid);
        assert!(!report.corruption_detected);
    }

    #[tokio::test]
    async fn flags_checksum_mismatch() {
        let bytes = sample_db_bytes();
        let report = verify(&bytes, Some("deadbeef")).await.unwrap();
        assert!(!report.valid);
        assert!(!report.corruption_detected);
        assert!(report.errors.iter().any(|e| e.contains("checksum mismatch")));
    }

    #[tokio::test]
    async fn detects_bytes_that_are_not_a_database() {
        let report = verify(b"definitely not a database", None).await.unwrap();
        assert!(!report.valid);
        assert!(report.corruption_detected);
        assert!(!report.errors.is_empty());
    }

    #[tokio::test]
    async fn detects_clobbered_header() {
        let mut bytes = sample_db_bytes();
        for b in bytes.iter_mut().take(16) {
            *b ^= 0xff;
        }
        let report = verify(&bytes, None).await.unwrap();
        assert!(report.corruption_detected);
    }

    #[tokio::test]
    async fn validate_file_rejects_garbage() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"garbage").unwrap();
        assert!(validate_file(file.path()).await.is_err());
    }
}
