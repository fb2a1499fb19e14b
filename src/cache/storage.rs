//! SQLite cache store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheEntry, CacheStore};
use crate::error::StoreError;
use crate::http::{Headers, RequestKey, Response};

/// Format SQLite's `datetime()` uses, which is what we store.
const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per generation (version identifier)
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses, keyed by the hash of the request identity
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (generation, key_hash),
    FOREIGN KEY (generation) REFERENCES generations(name) ON DELETE CASCADE
);

-- Single-row pointer to the current generation
CREATE TABLE IF NOT EXISTS controller (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    active TEXT
);
"#;

/// SQLite-based cache store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  quota: Option<u64>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    Self::from_connection(Connection::open(path)?)
  }

  /// A throwaway store that lives as long as the value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  /// Limit the total size of stored bodies, in bytes.
  pub fn with_quota(mut self, quota: Option<u64>) -> Self {
    self.quota = quota;
    self
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
      quota: None,
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }

  /// Fail if the bodies stored after a pending write exceed the quota. Run
  /// inside the write's transaction so a failure rolls it back.
  fn enforce_quota(&self, conn: &Connection) -> Result<(), StoreError> {
    let Some(quota) = self.quota else {
      return Ok(());
    };
    let used: i64 = conn.query_row(
      "SELECT COALESCE(SUM(LENGTH(body)), 0) FROM entries",
      [],
      |row| row.get(0),
    )?;
    let needed = used.max(0) as u64;
    if needed > quota {
      return Err(StoreError::QuotaExceeded { needed, quota });
    }
    Ok(())
  }
}

fn generation_exists(conn: &Connection, generation: &str) -> Result<bool, StoreError> {
  let found = conn
    .query_row(
      "SELECT 1 FROM generations WHERE name = ?",
      params![generation],
      |_| Ok(()),
    )
    .optional()?;
  Ok(found.is_some())
}

fn insert_entry(
  conn: &Connection,
  generation: &str,
  key: &RequestKey,
  response: &Response,
) -> Result<(), StoreError> {
  let headers = serde_json::to_string(&response.headers)?;
  let cached_at = Utc::now().format(SQLITE_DATETIME).to_string();
  conn.execute(
    "INSERT OR REPLACE INTO entries (generation, key_hash, url, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?)",
    params![
      generation,
      key.cache_hash(),
      key.url(),
      response.status,
      headers,
      response.body,
      cached_at
    ],
  )?;
  Ok(())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
  chrono::NaiveDateTime::parse_from_str(s, SQLITE_DATETIME)
    .map(|dt| dt.and_utc())
    .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}

#[async_trait]
impl CacheStore for SqliteStore {
  async fn generations(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM generations ORDER BY created_at, name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
  }

  async fn write_generation(
    &self,
    generation: &str,
    entries: Vec<(RequestKey, Response)>,
  ) -> Result<(), StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute(
      "INSERT OR IGNORE INTO generations (name) VALUES (?)",
      params![generation],
    )?;
    for (key, response) in &entries {
      insert_entry(&tx, generation, key, response)?;
    }
    self.enforce_quota(&tx)?;

    tx.commit()?;
    Ok(())
  }

  async fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    response: &Response,
  ) -> Result<(), StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    if !generation_exists(&tx, generation)? {
      return Err(StoreError::UnknownGeneration(generation.to_string()));
    }
    insert_entry(&tx, generation, key, response)?;
    self.enforce_quota(&tx)?;

    tx.commit()?;
    Ok(())
  }

  async fn get(
    &self,
    generation: &str,
    key: &RequestKey,
  ) -> Result<Option<CacheEntry>, StoreError> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE generation = ? AND key_hash = ?",
        params![generation, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers: Headers = serde_json::from_str(&headers)?;
        Ok(Some(CacheEntry {
          key: key.clone(),
          response: Response {
            status,
            headers,
            body,
          },
          generation: generation.to_string(),
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  async fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool, StoreError> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM entries WHERE generation = ? AND key_hash = ?",
      params![generation, key.cache_hash()],
    )?;
    Ok(removed > 0)
  }

  async fn keys(&self, generation: &str) -> Result<Vec<RequestKey>, StoreError> {
    let conn = self.lock()?;
    if !generation_exists(&conn, generation)? {
      return Err(StoreError::UnknownGeneration(generation.to_string()));
    }

    let mut stmt = conn.prepare("SELECT url FROM entries WHERE generation = ? ORDER BY url")?;
    let keys = stmt
      .query_map(params![generation], |row| row.get(0))?
      .map(|url| url.map(RequestKey::from_normalized))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
  }

  async fn delete_generation(&self, generation: &str) -> Result<bool, StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute(
      "UPDATE controller SET active = NULL WHERE active = ?",
      params![generation],
    )?;
    let removed = tx.execute(
      "DELETE FROM generations WHERE name = ?",
      params![generation],
    )?;

    tx.commit()?;
    Ok(removed > 0)
  }

  async fn active_generation(&self) -> Result<Option<String>, StoreError> {
    let conn = self.lock()?;
    let active: Option<Option<String>> = conn
      .query_row("SELECT active FROM controller WHERE id = 1", [], |row| {
        row.get(0)
      })
      .optional()?;
    Ok(active.flatten())
  }

  async fn set_active_generation(&self, generation: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    if !generation_exists(&conn, generation)? {
      return Err(StoreError::UnknownGeneration(generation.to_string()));
    }
    conn.execute(
      "INSERT INTO controller (id, active) VALUES (1, ?)
       ON CONFLICT(id) DO UPDATE SET active = excluded.active",
      params![generation],
    )?;
    Ok(())
  }
}
