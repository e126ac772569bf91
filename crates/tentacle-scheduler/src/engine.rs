//! Scheduler core — one evaluation cycle over the schedule state.
//!
//! Dispatch order is deliberate: publish to the broker first, then
//! CAS-advance the entry. A crash between the two replays the publish
//! (at-least-once, duplicates possible) but can never advance next_due
//! twice, because the second advance loses the CAS.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use tentacle_broker::Broker;
use tentacle_core::{Invocation, Result, TentacleError};
use tentacle_store::Store;

use crate::entry::{self, ENTRY_PREFIX, ScheduleEntry, quarantine_key};
use crate::lock::LeaseLock;

/// The single-writer scheduler loop body. Many instances may run; the
/// leased lock picks the one that dispatches.
pub struct SchedulerCore {
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    default_queue: String,
    lock: LeaseLock,
}

impl SchedulerCore {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn Broker>,
        role: &str,
        instance_id: &str,
        lease: Duration,
        default_queue: &str,
    ) -> Self {
        let lock = LeaseLock::new(store.clone(), role, instance_id, lease);
        Self {
            store,
            broker,
            default_queue: default_queue.to_string(),
            lock,
        }
    }

    /// One evaluation cycle. Returns the ids of invocations published
    /// this tick; empty when in standby or nothing is due.
    ///
    /// Store errors propagate untouched — nothing was mutated, the same
    /// entries are still due next tick.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<String>> {
        if !self.lock.acquire(now).await? {
            tracing::debug!("standby: lock held by another instance");
            return Ok(Vec::new());
        }

        let (entries, broken) = entry::load_all(&self.store).await?;
        for (key, reason) in broken {
            self.quarantine(&key, &reason).await;
        }

        let mut dispatched = Vec::new();
        for (mut entry, version) in entries {
            if !entry.is_due(now) {
                continue;
            }

            // Validate the advancement before publishing: an entry whose
            // cadence cannot produce a next occurrence is disabled, not
            // dispatched forever.
            let next_due = match entry.cadence.next_after(entry.next_due, now) {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!("disabling '{}': {e}", entry.name);
                    self.disable(entry, version).await;
                    continue;
                }
            };

            let invocation = Invocation::new(&entry.name, entry.next_due, now, entry.action.clone());
            let queue = entry.queue.as_deref().unwrap_or(&self.default_queue);

            if let Err(e) = self.broker.publish(queue, &invocation).await {
                // Entry stays due; it will be retried next tick.
                tracing::warn!("publish failed for '{}', deferring: {e}", entry.name);
                continue;
            }

            entry.next_due = next_due;
            entry.last_run_at = Some(now);
            entry.total_run_count += 1;
            let json = serde_json::to_string(&entry)?;
            match self.store.put(&entry.key(), &json, Some(version)).await {
                Ok(_) => {
                    tracing::info!(
                        "dispatched '{}' ({}), next due {}",
                        entry.name,
                        invocation.id,
                        entry.next_due
                    );
                }
                Err(TentacleError::VersionConflict(_)) => {
                    // Another replica advanced it concurrently; its write
                    // stands, our publish is the duplicate side of the
                    // at-least-once bound.
                    tracing::debug!("'{}' advanced by another writer", entry.name);
                }
                Err(e) => {
                    tracing::warn!(
                        "published '{}' but could not advance next_due: {e}; \
                         a duplicate dispatch may follow",
                        entry.name
                    );
                }
            }
            dispatched.push(invocation.id);
        }
        Ok(dispatched)
    }

    /// Release the lock so a standby can take over without waiting out
    /// the lease.
    pub async fn release_lock(&mut self) -> Result<()> {
        self.lock.release().await
    }

    /// Move an undecodable record out of the entry namespace so it is
    /// surfaced once instead of logged every tick. Best effort: failures
    /// leave the record in place for the next tick.
    async fn quarantine(&self, key: &str, reason: &str) {
        tracing::error!("quarantining '{key}': {reason}");
        let record = match self.store.get(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("could not read '{key}' for quarantine: {e}");
                return;
            }
        };
        let name = key.strip_prefix(ENTRY_PREFIX).unwrap_or(key);
        match self.store.put(&quarantine_key(name), &record.value, None).await {
            Ok(_) | Err(TentacleError::VersionConflict(_)) => {
                if let Err(e) = self.store.delete(key, record.version).await {
                    tracing::warn!("could not remove quarantined '{key}': {e}");
                }
            }
            Err(e) => tracing::warn!("could not quarantine '{key}': {e}"),
        }
    }

    async fn disable(&self, mut entry: ScheduleEntry, version: u64) {
        entry.enabled = false;
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("could not serialize '{}' to disable it: {e}", entry.name);
                return;
            }
        };
        match self.store.put(&entry.key(), &json, Some(version)).await {
            Ok(_) | Err(TentacleError::VersionConflict(_)) => {}
            Err(e) => tracing::warn!("could not disable '{}': {e}", entry.name),
        }
    }
}
