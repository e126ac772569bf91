//! Worker pool — parallel, independent consumers over one queue.
//!
//! Each consumer: claim a delivery, execute its action, write the
//! outcome onto the schedule entry (CAS with retry — the scheduler may
//! be advancing the same entry concurrently), then ack. Failed actions
//! record a `Failed` outcome and still ack: redelivery exists for
//! crashed workers, not for application failures.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;

use tentacle_broker::{Broker, Delivery};
use tentacle_core::{Outcome, Result, TentacleError};
use tentacle_scheduler::ScheduleEntry;
use tentacle_scheduler::entry::entry_key;
use tentacle_store::Store;

use crate::actions::ActionRegistry;

pub struct WorkerPool {
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    registry: Arc<ActionRegistry>,
    queue: String,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn Broker>,
        registry: Arc<ActionRegistry>,
        queue: &str,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            broker,
            registry,
            queue: queue.to_string(),
            concurrency: concurrency.max(1),
        }
    }

    /// Run consumers until shutdown is signalled. A delivery being
    /// handled when the signal arrives finishes (outcome + ack) before
    /// its consumer exits.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            "worker pool started ({} consumer(s) on '{}')",
            self.concurrency,
            self.queue
        );

        let mut set = JoinSet::new();
        for worker_id in 0..self.concurrency {
            let store = self.store.clone();
            let broker = self.broker.clone();
            let registry = self.registry.clone();
            let queue = self.queue.clone();
            let mut shutdown = shutdown.clone();

            set.spawn(async move {
                let mut consumer = match broker.consume(&queue).await {
                    Ok(consumer) => consumer,
                    Err(e) => {
                        tracing::error!("consumer {worker_id} could not open '{queue}': {e}");
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        delivery = consumer.next() => match delivery {
                            Ok(delivery) => handle_delivery(&store, &registry, delivery).await,
                            Err(e) => {
                                tracing::warn!("consumer {worker_id} error: {e}");
                                tokio::time::sleep(Duration::from_millis(500)).await;
                            }
                        }
                    }
                }
                tracing::debug!("consumer {worker_id} stopped");
            });
        }

        while set.join_next().await.is_some() {}
        tracing::info!("worker pool stopped");
        Ok(())
    }
}

async fn handle_delivery(store: &Arc<dyn Store>, registry: &ActionRegistry, delivery: Delivery) {
    let invocation = delivery.invocation.clone();
    if delivery.redelivered {
        tracing::debug!("redelivered invocation {} for '{}'", invocation.id, invocation.entry_name);
    }

    let result = match registry.get(&invocation.action.name) {
        Some(action) => action.execute(&invocation).await,
        None => Err(TentacleError::ActionNotFound(invocation.action.name.clone())),
    };

    let outcome = match result {
        Ok(()) => Outcome::success(Utc::now()),
        Err(e) => {
            tracing::warn!("invocation {} for '{}' failed: {e}", invocation.id, invocation.entry_name);
            Outcome::failed(e.to_string(), Utc::now())
        }
    };

    if !record_outcome(store, &invocation.entry_name, &outcome).await {
        // Transient store failure: leave the delivery unacked so the
        // broker redelivers it and a later attempt records the outcome.
        // Actions are required to be idempotent, so the rerun is safe.
        tracing::warn!(
            "outcome for invocation {} not recorded; leaving delivery for redelivery",
            invocation.id
        );
        return;
    }

    // Ack last: a crash before this point leaves the message inflight
    // and the broker will redeliver it.
    if let Err(e) = delivery.ack().await {
        tracing::warn!("could not ack invocation {}: {e}", invocation.id);
    }
}

/// Write the outcome onto the entry record. The scheduler may advance
/// the same entry between our read and write; on conflict, re-read and
/// retry so neither writer's fields are lost.
///
/// Returns whether the delivery is safe to ack: false only for
/// transient store failures, where redelivery gives the outcome another
/// chance to land. A missing or undecodable entry is a permanent state
/// and the outcome is dropped.
async fn record_outcome(store: &Arc<dyn Store>, entry_name: &str, outcome: &Outcome) -> bool {
    const MAX_ATTEMPTS: usize = 5;
    let key = entry_key(entry_name);
    for _ in 0..MAX_ATTEMPTS {
        let record = match store.get(&key).await {
            Ok(Some(record)) => record,
            // Entry deleted while its invocation was in flight; the
            // outcome has nowhere to live, and that is fine.
            Ok(None) => return true,
            Err(e) => {
                tracing::warn!("could not read '{entry_name}' to record outcome: {e}");
                return !e.is_transient();
            }
        };
        let mut entry: ScheduleEntry = match serde_json::from_str(&record.value) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("undecodable entry '{entry_name}' while recording outcome: {e}");
                return true;
            }
        };
        entry.last_outcome = Some(outcome.clone());
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("could not serialize outcome for '{entry_name}': {e}");
                return true;
            }
        };
        match store.put(&key, &json, Some(record.version)).await {
            Ok(_) => return true,
            Err(TentacleError::VersionConflict(_)) => continue,
            Err(e) => {
                tracing::warn!("could not record outcome for '{entry_name}': {e}");
                return !e.is_transient();
            }
        }
    }
    tracing::warn!("gave up recording outcome for '{entry_name}' after {MAX_ATTEMPTS} attempts");
    true
}
