//! # Tentacle Store
//!
//! Durable key-value storage for scheduler state: schedule entries and
//! the leader lock. Every key carries a version, and all writes go
//! through per-key compare-and-set — never blind overwrite. That is
//! what lets multiple scheduler replicas share one store without
//! double-advancing an entry or electing two leaders.
//!
//! Two backends:
//! - [`MemStore`] — in-process `HashMap`, for tests and `--ephemeral` runs.
//! - [`SqliteStore`] — single `kv` table, survives restarts.

pub mod mem;
pub mod sqlite;

pub use mem::MemStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use tentacle_core::Result;

/// A stored value plus the version CAS operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub value: String,
    pub version: u64,
}

/// Versioned key-value store with compare-and-set semantics.
///
/// Versions start at 1 on create and increase by 1 on every successful
/// put. A mismatched `expected` version fails with
/// `TentacleError::VersionConflict` and leaves the record untouched.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a record. `Ok(None)` means the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Record>>;

    /// Write a record. `expected = None` creates the key only if absent;
    /// `expected = Some(v)` replaces only if the current version is `v`.
    /// Returns the new version.
    async fn put(&self, key: &str, value: &str, expected: Option<u64>) -> Result<u64>;

    /// Delete a record only if the current version matches.
    async fn delete(&self, key: &str, expected: u64) -> Result<()>;

    /// List all records whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Record)>>;
}
