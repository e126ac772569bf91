//! Leased distributed lock over the store's compare-and-set.
//!
//! One lock per logical scheduler role elects the single active
//! instance; everyone else ticks in standby. The lease is refreshed on
//! every successful acquire, and released early on shutdown so a
//! standby can take over without waiting out the lease.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use tentacle_core::{Result, TentacleError};
use tentacle_store::Store;

/// Stored lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

/// A leased lock bound to one store key and one owner id.
pub struct LeaseLock {
    store: Arc<dyn Store>,
    key: String,
    owner: String,
    lease: Duration,
    /// Version of the record we hold, if we hold it.
    held: Option<u64>,
}

impl LeaseLock {
    pub fn new(store: Arc<dyn Store>, role: &str, owner: &str, lease: Duration) -> Self {
        Self {
            store,
            key: format!("lock/{role}"),
            owner: owner.to_string(),
            lease,
            held: None,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Acquire or refresh the lease. Returns false when another live
    /// owner holds it — normal standby state, not an error.
    pub async fn acquire(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let record = LockRecord {
            owner: self.owner.clone(),
            expires_at: now + self.lease,
        };
        let json = serde_json::to_string(&record)?;

        let outcome = match self.store.get(&self.key).await? {
            None => self.store.put(&self.key, &json, None).await,
            Some(current) => {
                let held_by: LockRecord =
                    serde_json::from_str(&current.value).map_err(|e| TentacleError::Schema {
                        key: self.key.clone(),
                        reason: e.to_string(),
                    })?;
                if held_by.owner != self.owner && held_by.expires_at > now {
                    self.held = None;
                    return Ok(false);
                }
                // Ours to refresh, or expired and up for grabs.
                self.store.put(&self.key, &json, Some(current.version)).await
            }
        };

        match outcome {
            Ok(version) => {
                self.held = Some(version);
                Ok(true)
            }
            // Raced with another instance; it won this lease.
            Err(TentacleError::VersionConflict(_)) => {
                self.held = None;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// True if the last acquire succeeded.
    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Release the lease early. A conflict means someone already took
    /// the lock over; nothing left to release either way.
    pub async fn release(&mut self) -> Result<()> {
        if let Some(version) = self.held.take() {
            match self.store.delete(&self.key, version).await {
                Ok(()) | Err(TentacleError::VersionConflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
