//! In-memory store backend. State lives only as long as the process;
//! meant for tests and `--ephemeral` single-process runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tentacle_core::{Result, TentacleError};

use crate::{Record, Store};

/// HashMap-backed store with the same CAS contract as the SQLite backend.
pub struct MemStore {
    // BTreeMap keeps list() ordered without a sort pass.
    records: Mutex<BTreeMap<String, Record>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Record>>> {
        self.records
            .lock()
            .map_err(|_| TentacleError::store("memory store poisoned"))
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get(&self, key: &str) -> Result<Option<Record>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str, expected: Option<u64>) -> Result<u64> {
        let mut records = self.lock()?;
        let current = records.get(key).map(|r| r.version);
        match (expected, current) {
            (None, None) => {
                records.insert(
                    key.to_string(),
                    Record {
                        value: value.to_string(),
                        version: 1,
                    },
                );
                Ok(1)
            }
            (Some(exp), Some(cur)) if exp == cur => {
                let version = cur + 1;
                records.insert(
                    key.to_string(),
                    Record {
                        value: value.to_string(),
                        version,
                    },
                );
                Ok(version)
            }
            _ => Err(TentacleError::VersionConflict(key.to_string())),
        }
    }

    async fn delete(&self, key: &str, expected: u64) -> Result<()> {
        let mut records = self.lock()?;
        match records.get(key) {
            Some(r) if r.version == expected => {
                records.remove(key);
                Ok(())
            }
            _ => Err(TentacleError::VersionConflict(key.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Record)>> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect())
    }
}
