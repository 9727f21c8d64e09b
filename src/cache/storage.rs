//! Cache storage trait and its SQLite, in-memory and no-op implementations.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::CacheEntry;

/// Trait for cache storage backends.
///
/// Writes to the same key overwrite each other; there are no transactions
/// spanning several keys.
pub trait CacheStorage: Send + Sync {
  /// Get an entry, expired or not.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>>;

  /// Insert or replace an entry.
  fn put(&self, entry: &CacheEntry) -> Result<()>;

  /// Remove one entry. Returns whether it existed.
  fn remove(&self, namespace: &str, key: &str) -> Result<bool>;

  /// Remove every entry in a namespace. Returns the number removed.
  fn clear_namespace(&self, namespace: &str) -> Result<usize>;

  /// Remove every entry outside the given namespaces.
  fn clear_except(&self, keep: &[&str]) -> Result<usize>;

  /// Entry counts per namespace.
  fn namespaces(&self) -> Result<BTreeMap<String, usize>>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _namespace: &str, _key: &str) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _entry: &CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _namespace: &str, _key: &str) -> Result<bool> {
    Ok(false)
  }

  fn clear_namespace(&self, _namespace: &str) -> Result<usize> {
    Ok(0)
  }

  fn clear_except(&self, _keep: &[&str]) -> Result<usize> {
    Ok(0)
  }

  fn namespaces(&self) -> Result<BTreeMap<String, usize>> {
    Ok(BTreeMap::new())
  }
}

/// Process-local storage.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), CacheEntry>>> {
    self.entries.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
    Ok(
      self
        .lock()?
        .get(&(namespace.to_string(), key.to_string()))
        .cloned(),
    )
  }

  fn put(&self, entry: &CacheEntry) -> Result<()> {
    self.lock()?.insert(
      (entry.namespace.clone(), entry.key.clone()),
      entry.clone(),
    );
    Ok(())
  }

  fn remove(&self, namespace: &str, key: &str) -> Result<bool> {
    Ok(
      self
        .lock()?
        .remove(&(namespace.to_string(), key.to_string()))
        .is_some(),
    )
  }

  fn clear_namespace(&self, namespace: &str) -> Result<usize> {
    let mut entries = self.lock()?;
    let before = entries.len();
    entries.retain(|(ns, _), _| ns != namespace);
    Ok(before - entries.len())
  }

  fn clear_except(&self, keep: &[&str]) -> Result<usize> {
    let mut entries = self.lock()?;
    let before = entries.len();
    entries.retain(|(ns, _), _| keep.contains(&ns.as_str()));
    Ok(before - entries.len())
  }

  fn namespaces(&self) -> Result<BTreeMap<String, usize>> {
    let mut counts = BTreeMap::new();
    for (ns, _) in self.lock()?.keys() {
      *counts.entry(ns.clone()).or_insert(0) += 1;
    }
    Ok(counts)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Create a new SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Create a new SQLite storage at the given path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tymctl").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables. Timestamps are Unix milliseconds.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at INTEGER NOT NULL,
    expires_at INTEGER,
    PRIMARY KEY (namespace, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry
    ON cache_entries(expires_at);
"#;

impl CacheStorage for SqliteStorage {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, i64, Option<i64>)> = conn
      .query_row(
        "SELECT data, cached_at, expires_at FROM cache_entries
         WHERE namespace = ? AND entry_key = ?",
        params![namespace, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    match row {
      Some((data, cached_at, expires_at)) => Ok(Some(CacheEntry {
        namespace: namespace.to_string(),
        key: key.to_string(),
        data,
        cached_at: from_millis(cached_at)?,
        expires_at: expires_at.map(from_millis).transpose()?,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, entry: &CacheEntry) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO cache_entries (namespace, entry_key, data, cached_at, expires_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          entry.namespace,
          entry.key,
          entry.data,
          entry.cached_at.timestamp_millis(),
          entry.expires_at.map(|t| t.timestamp_millis()),
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn remove(&self, namespace: &str, key: &str) -> Result<bool> {
    let removed = self
      .lock()?
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ? AND entry_key = ?",
        params![namespace, key],
      )
      .map_err(|e| eyre!("Failed to remove cache entry: {}", e))?;

    Ok(removed > 0)
  }

  fn clear_namespace(&self, namespace: &str) -> Result<usize> {
    self
      .lock()?
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to clear namespace {}: {}", namespace, e))
  }

  fn clear_except(&self, keep: &[&str]) -> Result<usize> {
    let conn = self.lock()?;
    if keep.is_empty() {
      return conn
        .execute("DELETE FROM cache_entries", [])
        .map_err(|e| eyre!("Failed to clear cache: {}", e));
    }

    let placeholders = vec!["?"; keep.len()].join(", ");
    let sql = format!(
      "DELETE FROM cache_entries WHERE namespace NOT IN ({})",
      placeholders
    );
    conn
      .execute(&sql, rusqlite::params_from_iter(keep.iter()))
      .map_err(|e| eyre!("Failed to clear cache: {}", e))
  }

  fn namespaces(&self) -> Result<BTreeMap<String, usize>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT namespace, COUNT(*) FROM cache_entries GROUP BY namespace")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let counts = stmt
      .query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
      })
      .map_err(|e| eyre!("Failed to query namespaces: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(counts)
  }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
  Utc
    .timestamp_millis_opt(ms)
    .single()
    .ok_or_else(|| eyre!("Invalid timestamp in cache: {}", ms))
}
