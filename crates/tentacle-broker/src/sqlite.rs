//! SQLite-backed broker. Messages are rows; claiming a message is a
//! conditional UPDATE from `ready` to `inflight`, ack deletes the row,
//! and a reap pass re-readies rows whose visibility deadline passed.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tentacle_core::{Invocation, Result, TentacleError};

use crate::{Acker, Broker, Consumer, Delivery};

type SharedConn = Arc<Mutex<rusqlite::Connection>>;

/// Durable broker backend.
pub struct SqliteBroker {
    conn: SharedConn,
    redelivery: Duration,
}

impl SqliteBroker {
    /// Open or create the broker database. `redelivery` is the
    /// visibility timeout for unacked deliveries.
    pub fn open(path: &Path, redelivery: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| TentacleError::Broker(format!("DB open: {e}")))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| TentacleError::Broker(format!("DB busy_timeout: {e}")))?;
        let broker = Self {
            conn: Arc::new(Mutex::new(conn)),
            redelivery,
        };
        broker.migrate()?;
        tracing::debug!("broker opened at {}", path.display());
        Ok(broker)
    }

    fn migrate(&self) -> Result<()> {
        lock(&self.conn)?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS queue_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                body TEXT NOT NULL,              -- invocation JSON
                state TEXT NOT NULL DEFAULT 'ready',
                visible_at INTEGER,              -- unix millis, inflight only
                redelivered INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_queue_state
                ON queue_messages (queue, state, id);
            ",
            )
            .map_err(|e| TentacleError::Broker(format!("Migration: {e}")))?;
        Ok(())
    }
}

fn lock(conn: &SharedConn) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
    conn.lock()
        .map_err(|_| TentacleError::broker("sqlite broker poisoned"))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn publish(&self, queue: &str, invocation: &Invocation) -> Result<()> {
        let body = serde_json::to_string(invocation)?;
        lock(&self.conn)?
            .execute(
                "INSERT INTO queue_messages (queue, body, state) VALUES (?1, ?2, 'ready')",
                rusqlite::params![queue, body],
            )
            .map_err(|e| TentacleError::Broker(format!("Publish: {e}")))?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>> {
        Ok(Box::new(SqliteConsumer {
            conn: self.conn.clone(),
            queue: queue.to_string(),
            redelivery: self.redelivery,
        }))
    }
}

struct SqliteConsumer {
    conn: SharedConn,
    queue: String,
    redelivery: Duration,
}

impl SqliteConsumer {
    /// Try to claim the oldest ready message. Claim and read happen under
    /// one connection lock so concurrent consumers never double-claim.
    fn try_claim(&self) -> Result<Option<(i64, Invocation, bool)>> {
        let conn = lock(&self.conn)?;
        let now = now_millis();

        // Reap: expired inflight rows become ready again, marked redelivered.
        conn.execute(
            "UPDATE queue_messages SET state = 'ready', visible_at = NULL, redelivered = 1
             WHERE queue = ?1 AND state = 'inflight' AND visible_at <= ?2",
            rusqlite::params![self.queue, now],
        )
        .map_err(|e| TentacleError::Broker(format!("Reap: {e}")))?;

        let candidate: Option<i64> = conn
            .query_row(
                "SELECT id FROM queue_messages
                 WHERE queue = ?1 AND state = 'ready' ORDER BY id LIMIT 1",
                rusqlite::params![self.queue],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(TentacleError::Broker(format!("Select: {other}"))),
            })?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let deadline = now + self.redelivery.as_millis() as i64;
        let claimed = conn
            .execute(
                "UPDATE queue_messages SET state = 'inflight', visible_at = ?1
                 WHERE id = ?2 AND state = 'ready'",
                rusqlite::params![deadline, id],
            )
            .map_err(|e| TentacleError::Broker(format!("Claim: {e}")))?;
        if claimed != 1 {
            return Ok(None);
        }

        let (body, redelivered): (String, bool) = conn
            .query_row(
                "SELECT body, redelivered FROM queue_messages WHERE id = ?1",
                rusqlite::params![id],
                |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)),
            )
            .map_err(|e| TentacleError::Broker(format!("Read: {e}")))?;
        let invocation: Invocation = serde_json::from_str(&body)?;
        Ok(Some((id, invocation, redelivered)))
    }
}

#[async_trait]
impl Consumer for SqliteConsumer {
    async fn next(&mut self) -> Result<Delivery> {
        loop {
            if let Some((id, invocation, redelivered)) = self.try_claim()? {
                return Ok(Delivery::new(
                    invocation,
                    redelivered,
                    Box::new(SqliteAcker {
                        conn: self.conn.clone(),
                        id,
                    }),
                ));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

struct SqliteAcker {
    conn: SharedConn,
    id: i64,
}

#[async_trait]
impl Acker for SqliteAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        lock(&self.conn)?
            .execute(
                "DELETE FROM queue_messages WHERE id = ?1 AND state = 'inflight'",
                rusqlite::params![self.id],
            )
            .map_err(|e| TentacleError::Broker(format!("Ack: {e}")))?;
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

    fn temp_broker(name: &str, redelivery: Duration) -> (SqliteBroker, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("tentacle-broker-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("broker.db");
        std::fs::remove_file(&path).ok();
        (SqliteBroker::open(&path, redelivery).unwrap(), dir)
    }

    #[tokio::test]
    async fn test_published_message_survives_reopen() {
        let dir = std::env::temp_dir().join("tentacle-broker-reopen");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("broker.db");
        std::fs::remove_file(&path).ok();

        {
            let broker = SqliteBroker::open(&path, Duration::from_secs(60)).unwrap();
            broker.publish("q", &invocation("durable")).await.unwrap();
        }
        let broker = SqliteBroker::open(&path, Duration::from_secs(60)).unwrap();
        let mut consumer = broker.consume("q").await.unwrap();
        let d = tokio::time::timeout(Duration::from_secs(2), consumer.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d.invocation.entry_name, "durable");
        d.ack().await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_inflight_not_visible_to_second_consumer() {
        let (broker, dir) = temp_broker("inflight", Duration::from_secs(60));
        broker.publish("q", &invocation("only")).await.unwrap();

        let mut c1 = broker.consume("q").await.unwrap();
        let _held = tokio::time::timeout(Duration::from_secs(2), c1.next())
            .await
            .unwrap()
            .unwrap();

        let mut c2 = broker.consume("q").await.unwrap();
        let res = tokio::time::timeout(Duration::from_millis(300), c2.next()).await;
        assert!(res.is_err(), "inflight message must not be claimable");
        std::fs::remove_dir_all(&dir).ok();
    }
}
