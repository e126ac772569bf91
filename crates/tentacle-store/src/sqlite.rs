//! SQLite-backed store. One `kv` table, one row per key; CAS is a
//! conditional UPDATE checked by affected-row count, so two replicas
//! sharing the file cannot both win the same version.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tentacle_core::{Result, TentacleError};

use crate::{Record, Store};

/// Durable store backend.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open or create the store database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| TentacleError::Store(format!("DB open: {e}")))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| TentacleError::Store(format!("DB busy_timeout: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::debug!("store opened at {}", path.display());
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                version INTEGER NOT NULL
            );
            ",
            )
            .map_err(|e| TentacleError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| TentacleError::store("sqlite store poisoned"))
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT value, version FROM kv WHERE key = ?1")
            .map_err(|e| TentacleError::Store(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map([key], |row| {
                Ok(Record {
                    value: row.get(0)?,
                    version: row.get::<_, i64>(1)? as u64,
                })
            })
            .map_err(|e| TentacleError::Store(format!("Query: {e}")))?;
        match rows.next() {
            Some(Ok(rec)) => Ok(Some(rec)),
            Some(Err(e)) => Err(TentacleError::Store(format!("Row: {e}"))),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, expected: Option<u64>) -> Result<u64> {
        let conn = self.lock()?;
        match expected {
            None => {
                let changed = conn
                    .execute(
                        "INSERT OR IGNORE INTO kv (key, value, version) VALUES (?1, ?2, 1)",
                        rusqlite::params![key, value],
                    )
                    .map_err(|e| TentacleError::Store(format!("Insert: {e}")))?;
                if changed == 1 {
                    Ok(1)
                } else {
                    Err(TentacleError::VersionConflict(key.to_string()))
                }
            }
            Some(exp) => {
                let changed = conn
                    .execute(
                        "UPDATE kv SET value = ?1, version = version + 1
                         WHERE key = ?2 AND version = ?3",
                        rusqlite::params![value, key, exp as i64],
                    )
                    .map_err(|e| TentacleError::Store(format!("Update: {e}")))?;
                if changed == 1 {
                    Ok(exp + 1)
                } else {
                    Err(TentacleError::VersionConflict(key.to_string()))
                }
            }
        }
    }

    async fn delete(&self, key: &str, expected: u64) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "DELETE FROM kv WHERE key = ?1 AND version = ?2",
                rusqlite::params![key, expected as i64],
            )
            .map_err(|e| TentacleError::Store(format!("Delete: {e}")))?;
        if changed == 1 {
            Ok(())
        } else {
            Err(TentacleError::VersionConflict(key.to_string()))
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Record)>> {
        let conn = self.lock()?;
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = conn
            .prepare(
                "SELECT key, value, version FROM kv
                 WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
            )
            .map_err(|e| TentacleError::Store(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map([pattern], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Record {
                        value: row.get(1)?,
                        version: row.get::<_, i64>(2)? as u64,
                    },
                ))
            })
            .map_err(|e| TentacleError::Store(format!("Query: {e}")))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| TentacleError::Store(format!("Row: {e}")))?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> (SqliteStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("tentacle-sqlite-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("store.db");
        std::fs::remove_file(&path).ok();
        (SqliteStore::open(&path).unwrap(), dir)
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = std::env::temp_dir().join("tentacle-sqlite-reopen");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("store.db");
        std::fs::remove_file(&path).ok();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put("entry/daily", "payload", None).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let rec = store.get("entry/daily").await.unwrap().unwrap();
        assert_eq!(rec.value, "payload");
        assert_eq!(rec.version, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_stale_update_leaves_row_untouched() {
        let (store, dir) = temp_store("stale");
        store.put("k", "v1", None).await.unwrap();
        store.put("k", "v2", Some(1)).await.unwrap();
        assert!(store.put("k", "v-lost", Some(1)).await.is_err());
        let rec = store.get("k").await.unwrap().unwrap();
        assert_eq!(rec.value, "v2");
        assert_eq!(rec.version, 2);
        std::fs::remove_dir_all(&dir).ok();
    }
}
