use crate::error::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open the catalog pool. The catalog is the only place backup history
/// lives, so durability pragmas are strict.
pub fn create_pool(catalog_path: &Path) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(catalog_path);
    let pool = Pool::builder().max_size(4).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = DELETE;
         PRAGMA synchronous = FULL;
         PRAGMA foreign_keys = ON;",
    )?;

    Ok(pool)
}
