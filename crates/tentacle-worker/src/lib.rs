//! # Tentacle Worker
//!
//! The consuming side of the broker: a pool of independent consumers
//! that execute invocations and write outcomes back to the schedule
//! store. Acknowledgement happens only after the outcome is durably
//! recorded; a worker that dies mid-flight leaves the message to be
//! redelivered. Actions must therefore tolerate duplicate invocations —
//! the pool makes no exactly-once claim.

pub mod actions;
pub mod pool;

pub use actions::{Action, ActionRegistry, LogAction, WebhookAction};
pub use pool::WorkerPool;
