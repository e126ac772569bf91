//! # Tentacle Broker
//!
//! Transports invocations from the scheduler core to workers with
//! at-least-once delivery: a published message is never dropped, but a
//! consumer that crashes before acknowledging will see it again after
//! the visibility timeout. Ack only after the work (or its outcome) is
//! durably recorded.
//!
//! Two backends:
//! - [`MemBroker`] — in-process queues, for tests and single-process runs.
//! - [`SqliteBroker`] — durable queue table, survives restarts.

pub mod mem;
pub mod sqlite;

pub use mem::MemBroker;
pub use sqlite::SqliteBroker;

use async_trait::async_trait;
use tentacle_core::{Invocation, Result};

/// Reliable publish/consume of invocations on named queues.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Durably enqueue an invocation. Returning `Ok` means the message
    /// will be delivered at least once.
    async fn publish(&self, queue: &str, invocation: &Invocation) -> Result<()>;

    /// Open an infinite consumer on a queue. Deliveries are not
    /// restartable once acknowledged.
    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>>;
}

/// An open subscription. `next` waits until a message is available.
#[async_trait]
pub trait Consumer: Send {
    async fn next(&mut self) -> Result<Delivery>;
}

/// One in-flight delivery. Dropping it without calling [`Delivery::ack`]
/// leaves the message in flight until the visibility timeout requeues it.
pub struct Delivery {
    pub invocation: Invocation,
    /// True if this message was delivered before and not acknowledged.
    pub redelivered: bool,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(invocation: Invocation, redelivered: bool, acker: Box<dyn Acker>) -> Self {
        Self {
            invocation,
            redelivered,
            acker,
        }
    }

    /// Acknowledge the delivery, consuming it permanently.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }
}

/// Backend-specific acknowledgement handle.
#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tentacle_core::ActionRef;

    fn invocation(entry: &str) -> Invocation {
        let now = chrono::Utc::now();
        Invocation::new(entry, now, now, ActionRef::new("log", serde_json::json!({})))
    }

    /// Delivery/ack/redelivery contract shared by both backends.
    async fn check_delivery_contract(broker: Arc<dyn Broker>) {
        broker.publish("q", &invocation("first")).await.unwrap();
        broker.publish("q", &invocation("second")).await.unwrap();

        let mut consumer = broker.consume("q").await.unwrap();

        // FIFO order, not redelivered.
        let d1 = tokio::time::timeout(Duration::from_secs(2), consumer.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d1.invocation.entry_name, "first");
        assert!(!d1.redelivered);

        let d2 = tokio::time::timeout(Duration::from_secs(2), consumer.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d2.invocation.entry_name, "second");

        // Ack the first; drop the second unacked.
        d1.ack().await.unwrap();
        drop(d2);

        // After the visibility timeout only the unacked message returns,
        // flagged as redelivered.
        let d = tokio::time::timeout(Duration::from_secs(5), consumer.next())
            .await
            .expect("unacked message should be redelivered")
            .unwrap();
        assert_eq!(d.invocation.entry_name, "second");
        assert!(d.redelivered);
        d.ack().await.unwrap();

        // Queue drained: nothing left to deliver.
        let res = tokio::time::timeout(Duration::from_millis(300), consumer.next()).await;
        assert!(res.is_err(), "acked messages must never be redelivered");
    }

    #[tokio::test]
    async fn test_mem_broker_contract() {
        check_delivery_contract(Arc::new(MemBroker::new(Duration::from_millis(200)))).await;
    }

    #[tokio::test]
    async fn test_sqlite_broker_contract() {
        let dir = std::env::temp_dir().join("tentacle-broker-contract");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("broker.db");
        std::fs::remove_file(&path).ok();
        let broker = SqliteBroker::open(&path, Duration::from_millis(200)).unwrap();
        check_delivery_contract(Arc::new(broker)).await;
        std::fs::remove_dir_all(&dir).ok();
    }
}
