//! Ticker selection and the scheduler run loop.
//!
//! A `Ticker` is the tick-evaluation capability the loop drives. The
//! concrete variant is picked from config by name at startup through a
//! small registry — no late-bound class resolution.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;

use tentacle_broker::Broker;
use tentacle_core::config::{BrokerConfig, SchedulerConfig};
use tentacle_core::{Result, TentacleError};
use tentacle_store::Store;

use crate::engine::SchedulerCore;

/// One evaluation cycle against the current time.
#[async_trait]
pub trait Ticker: Send {
    fn name(&self) -> &'static str;

    /// Evaluate due work at `now`; returns the dispatched invocation ids.
    async fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<String>>;

    /// Called once on graceful shutdown, after the in-flight tick.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Ticker for SchedulerCore {
    fn name(&self) -> &'static str {
        "core"
    }

    async fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<String>> {
        SchedulerCore::tick(self, now).await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.release_lock().await
    }
}

/// Ticker that never dispatches. Useful for drills and for running a
/// replica that should only ever observe.
pub struct NoopTicker;

#[async_trait]
impl Ticker for NoopTicker {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn tick(&mut self, _now: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Build the configured ticker.
pub fn build_ticker(
    scheduler: &SchedulerConfig,
    broker_cfg: &BrokerConfig,
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    instance_id: &str,
) -> Result<Box<dyn Ticker>> {
    scheduler.validate()?;
    match scheduler.ticker.as_str() {
        "core" => Ok(Box::new(SchedulerCore::new(
            store,
            broker,
            &scheduler.role,
            instance_id,
            Duration::seconds(scheduler.lease_secs as i64),
            &broker_cfg.queue,
        ))),
        "noop" => Ok(Box::new(NoopTicker)),
        other => Err(TentacleError::TickerNotFound(other.to_string())),
    }
}

/// Drive a ticker until shutdown is signalled. The in-flight tick always
/// finishes before the ticker's shutdown hook runs, so a mid-tick signal
/// can never leave a publish without its store advancement attempt.
pub async fn run_ticker(
    mut ticker: Box<dyn Ticker>,
    tick_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!(
        "scheduler '{}' started (tick every {tick_secs}s)",
        ticker.name()
    );
    let mut interval = tokio::time::interval(StdDuration::from_secs(tick_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }

        match ticker.tick(Utc::now()).await {
            Ok(ids) if !ids.is_empty() => {
                tracing::info!("tick dispatched {} invocation(s)", ids.len());
            }
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                tracing::warn!("tick failed, retrying next tick: {e}");
            }
            Err(e) => {
                tracing::error!("tick failed: {e}");
            }
        }

        if *shutdown.borrow() {
            break;
        }
    }

    ticker.shutdown().await?;
    tracing::info!("scheduler '{}' stopped", ticker.name());
    Ok(())
}
