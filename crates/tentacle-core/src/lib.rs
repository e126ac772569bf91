//! # Tentacle Core
//!
//! Shared foundation for the Tentacle scheduler: configuration,
//! the unified error type, and the data model that crosses crate
//! boundaries (invocations, actions, outcomes).

pub mod config;
pub mod error;
pub mod types;

pub use config::TentacleConfig;
pub use error::{Result, TentacleError};
pub use types::{ActionRef, Invocation, Outcome};
