//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use url::Url;

use super::traits::CacheKey;
use crate::network::{Request, Response};

/// Handle to an opened cache partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionHandle {
  pub id: i64,
  pub name: String,
}

/// A cached response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Summary of a partition, for inspection.
#[derive(Debug, Clone)]
pub struct PartitionInfo {
  pub name: String,
  pub created_at: DateTime<Utc>,
  /// Set once a bulk population committed
  pub installed_at: Option<DateTime<Utc>>,
  pub entries: usize,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Open a partition by name, creating it if absent. Opening the same name
  /// again yields the same partition.
  fn open(&self, name: &str) -> Result<PartitionHandle>;

  /// Store all entries in one unit and mark the partition installed.
  /// Either every entry is written or none is.
  fn put_all(&self, partition: &PartitionHandle, entries: &[(Request, Response)]) -> Result<()>;

  /// Look up the stored response for a request in the named partition.
  fn match_request(&self, name: &str, request: &Request) -> Result<Option<CachedEntry>>;

  /// Whether the named partition has completed a bulk population.
  fn is_installed(&self, name: &str) -> Result<bool>;

  /// All partitions in creation order.
  fn partitions(&self) -> Result<Vec<PartitionInfo>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open_path(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named cache partitions
CREATE TABLE IF NOT EXISTS partitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    installed_at TEXT
);

-- Request -> response entries, keyed by request hash within a partition
CREATE TABLE IF NOT EXISTS entries (
    partition_id INTEGER NOT NULL,
    key_hash TEXT NOT NULL,
    request_url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition_id, key_hash),
    FOREIGN KEY (partition_id) REFERENCES partitions(id) ON DELETE CASCADE
);
"#;

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<PartitionHandle> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create partition {}: {}", name, e))?;

    let id: i64 = conn
      .query_row(
        "SELECT id FROM partitions WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;

    Ok(PartitionHandle {
      id,
      name: name.to_string(),
    })
  }

  fn put_all(&self, partition: &PartitionHandle, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.lock()?;

    // Dropping the transaction without commit rolls everything back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (request, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO entries
           (partition_id, key_hash, request_url, response_url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          partition.id,
          request.cache_hash(),
          request.description(),
          response.url.as_str(),
          response.status,
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", request.description(), e))?;
    }

    let updated = tx
      .execute(
        "UPDATE partitions SET installed_at = datetime('now') WHERE id = ?",
        params![partition.id],
      )
      .map_err(|e| eyre!("Failed to mark partition installed: {}", e))?;
    if updated == 0 {
      return Err(eyre!("Partition {} does not exist", partition.name));
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn match_request(&self, name: &str, request: &Request) -> Result<Option<CachedEntry>> {
    if !request.is_cacheable() {
      return Ok(None);
    }

    let conn = self.lock()?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT e.response_url, e.status, e.headers, e.body, e.cached_at
         FROM entries e
         INNER JOIN partitions p ON p.id = e.partition_id
         WHERE p.name = ? AND e.key_hash = ?",
        params![name, request.cache_hash()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request.description(), e))?;

    let Some((url, status, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let url = Url::parse(&url).map_err(|e| eyre!("Invalid cached URL '{}': {}", url, e))?;
    let headers: Vec<(String, Vec<u8>)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    Ok(Some(CachedEntry {
      response: Response {
        url,
        status,
        headers,
        body,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn is_installed(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    let installed: Option<bool> = conn
      .query_row(
        "SELECT installed_at IS NOT NULL FROM partitions WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read partition {}: {}", name, e))?;

    Ok(installed.unwrap_or(false))
  }

  fn partitions(&self) -> Result<Vec<PartitionInfo>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT p.name, p.created_at, p.installed_at, COUNT(e.key_hash)
         FROM partitions p
         LEFT JOIN entries e ON e.partition_id = p.id
         GROUP BY p.id
         ORDER BY p.id",
      )
      .map_err(|e| eyre!("Failed to prepare partition query: {}", e))?;

    let rows: Vec<(String, String, Option<String>, i64)> = stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .map_err(|e| eyre!("Failed to query partitions: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read partition row: {}", e))?;

    rows
      .into_iter()
      .map(|(name, created_at, installed_at, entries)| {
        Ok(PartitionInfo {
          name,
          created_at: parse_datetime(&created_at)?,
          installed_at: installed_at.as_deref().map(parse_datetime).transpose()?,
          entries: entries as usize,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
