//! In-process broker backend. Queues live in memory; delivery semantics
//! (ack, visibility timeout, redelivery) match the durable backend so
//! tests exercise the same contract workers run against.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tentacle_core::{Invocation, Result, TentacleError};
use tokio::time::Instant;

use crate::{Acker, Broker, Consumer, Delivery};

struct QueueMsg {
    id: u64,
    invocation: Invocation,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<QueueMsg>,
    inflight: HashMap<u64, (Invocation, Instant)>,
}

type SharedQueue = Arc<Mutex<QueueState>>;

/// In-memory broker with per-queue FIFO and timeout-based redelivery.
pub struct MemBroker {
    queues: Mutex<HashMap<String, SharedQueue>>,
    redelivery: Duration,
}

impl MemBroker {
    /// `redelivery` is the visibility timeout for unacked deliveries.
    pub fn new(redelivery: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            redelivery,
        }
    }

    fn queue(&self, name: &str) -> Result<SharedQueue> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| TentacleError::broker("queue map poisoned"))?;
        Ok(queues.entry(name.to_string()).or_default().clone())
    }
}

#[async_trait]
impl Broker for MemBroker {
    async fn publish(&self, queue: &str, invocation: &Invocation) -> Result<()> {
        let queue = self.queue(queue)?;
        let mut state = queue
            .lock()
            .map_err(|_| TentacleError::broker("queue poisoned"))?;
        let id = state.next_id;
        state.next_id += 1;
        state.ready.push_back(QueueMsg {
            id,
            invocation: invocation.clone(),
            redelivered: false,
        });
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>> {
        Ok(Box::new(MemConsumer {
            queue: self.queue(queue)?,
            redelivery: self.redelivery,
        }))
    }
}

struct MemConsumer {
    queue: SharedQueue,
    redelivery: Duration,
}

#[async_trait]
impl Consumer for MemConsumer {
    async fn next(&mut self) -> Result<Delivery> {
        loop {
            {
                let mut state = self
                    .queue
                    .lock()
                    .map_err(|_| TentacleError::broker("queue poisoned"))?;

                // Requeue deliveries whose visibility timeout elapsed.
                let now = Instant::now();
                let expired: Vec<u64> = state
                    .inflight
                    .iter()
                    .filter(|(_, (_, deadline))| *deadline <= now)
                    .map(|(id, _)| *id)
                    .collect();
                for id in expired {
                    if let Some((invocation, _)) = state.inflight.remove(&id) {
                        state.ready.push_back(QueueMsg {
                            id,
                            invocation,
                            redelivered: true,
                        });
                    }
                }

                if let Some(msg) = state.ready.pop_front() {
                    state
                        .inflight
                        .insert(msg.id, (msg.invocation.clone(), now + self.redelivery));
                    return Ok(Delivery::new(
                        msg.invocation,
                        msg.redelivered,
                        Box::new(MemAcker {
                            queue: self.queue.clone(),
                            id: msg.id,
                        }),
                    ));
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

struct MemAcker {
    queue: SharedQueue,
    id: u64,
}

#[async_trait]
impl Acker for MemAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        let mut state = self
            .queue
            .lock()
            .map_err(|_| TentacleError::broker("queue poisoned"))?;
        // A message reaped back to ready before this ack lands will be
        // delivered again; that is the at-least-once bound, not a bug.
        state.inflight.remove(&self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tentacle_core::ActionRef;

    fn invocation(entry: &str) -> Invocation {
        let now = chrono::Utc::now();
        Invocation::new(entry, now, now, ActionRef::new("log", serde_json::json!({})))
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let broker = MemBroker::new(Duration::from_secs(60));
        broker.publish("a", &invocation("for-a")).await.unwrap();
        broker.publish("b", &invocation("for-b")).await.unwrap();

        let mut consumer_b = broker.consume("b").await.unwrap();
        let d = tokio::time::timeout(Duration::from_secs(1), consumer_b.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d.invocation.entry_name, "for-b");
    }

    #[tokio::test]
    async fn test_two_consumers_split_work() {
        let broker = MemBroker::new(Duration::from_secs(60));
        broker.publish("q", &invocation("one")).await.unwrap();
        broker.publish("q", &invocation("two")).await.unwrap();

        let mut c1 = broker.consume("q").await.unwrap();
        let mut c2 = broker.consume("q").await.unwrap();

        let d1 = tokio::time::timeout(Duration::from_secs(1), c1.next())
            .await
            .unwrap()
            .unwrap();
        let d2 = tokio::time::timeout(Duration::from_secs(1), c2.next())
            .await
            .unwrap()
            .unwrap();
        let mut names = vec![d1.invocation.entry_name.clone(), d2.invocation.entry_name.clone()];
        names.sort();
        assert_eq!(names, vec!["one", "two"]);
    }
}
