//! # Tentacle Scheduler
//!
//! The scheduler core: a single-writer loop that, on a cadence, finds
//! due schedule entries in the store, publishes invocations to the
//! broker, and advances each entry's next-due time through
//! compare-and-set. Replicas are serialized by a leased lock held in
//! the same store, so any number of standby instances may run.
//!
//! ## Architecture
//! ```text
//! run loop (tokio interval)
//!   └── Ticker::tick(now)
//!         ├── LeaseLock::acquire — CAS on lock/<role>; standby on failure
//!         ├── scan entry/* for enabled entries with next_due <= now
//!         ├── Broker::publish(Invocation)     (failure: entry stays due)
//!         └── CAS-advance next_due            (conflict: replica won, move on)
//! ```

pub mod cron;
pub mod engine;
pub mod entry;
pub mod lock;
pub mod registry;

pub use engine::SchedulerCore;
pub use entry::{Cadence, Crontab, Period, ScheduleEntry};
pub use lock::LeaseLock;
pub use registry::{NoopTicker, Ticker, build_ticker, run_ticker};
