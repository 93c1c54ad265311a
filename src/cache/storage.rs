//! Durable storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::key::RecordPath;

/// Trait for durable storage backends.
///
/// One opaque byte payload per record path. Backends are slow relative to the
/// in-memory layer and unbounded; callers treat every failure as recoverable.
pub trait DurableStore: Send + Sync {
  /// Read a record. A missing record is `Ok(None)`, not an error.
  fn read(&self, path: &RecordPath) -> Result<Option<Vec<u8>>>;

  /// Create or replace a record.
  fn write(&self, path: &RecordPath, data: &[u8]) -> Result<()>;

  /// Remove a record. Removing a missing record succeeds.
  fn remove(&self, path: &RecordPath) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl DurableStore for NoopStorage {
  fn read(&self, _path: &RecordPath) -> Result<Option<Vec<u8>>> {
    Ok(None) // Always miss
  }

  fn write(&self, _path: &RecordPath, _data: &[u8]) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _path: &RecordPath) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based durable storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database under `dir`.
  pub fn open(dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(dir)
      .map_err(|e| eyre!("Failed to create cache directory {}: {}", dir.display(), e))?;

    let path = dir.join("cache.db");
    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway database that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  /// Get the default cache directory.
  pub fn default_dir() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
      .ok_or_else(|| eyre!("Could not determine cache directory"))?;

    Ok(cache_dir.join("memos-sync"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cached record (serialized JSON or raw image bytes)
CREATE TABLE IF NOT EXISTS cache_records (
    namespace TEXT NOT NULL,
    kind TEXT NOT NULL,
    record_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, kind, record_key)
);
"#;

impl DurableStore for SqliteStorage {
  fn read(&self, path: &RecordPath) -> Result<Option<Vec<u8>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT data FROM cache_records
         WHERE namespace = ? AND kind = ? AND record_key = ?",
        params![path.namespace, path.kind.as_str(), path.key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache record {}: {}", path, e))
  }

  fn write(&self, path: &RecordPath, data: &[u8]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_records (namespace, kind, record_key, data, cached_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![path.namespace, path.kind.as_str(), path.key, data],
      )
      .map_err(|e| eyre!("Failed to write cache record {}: {}", path, e))?;

    Ok(())
  }

  fn remove(&self, path: &RecordPath) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_records WHERE namespace = ? AND kind = ? AND record_key = ?",
        params![path.namespace, path.kind.as_str(), path.key],
      )
      .map_err(|e| eyre!("Failed to delete cache record {}: {}", path, e))?;

    Ok(())
  }
}
