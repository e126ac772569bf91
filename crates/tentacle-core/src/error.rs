//! Unified error types for Tentacle.

use thiserror::Error;

/// Result type alias using TentacleError.
pub type Result<T> = std::result::Result<T, TentacleError>;

#[derive(Error, Debug)]
pub enum TentacleError {
    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Version conflict on key: {0}")]
    VersionConflict(String),

    // Broker errors
    #[error("Broker error: {0}")]
    Broker(String),

    // Scheduler errors
    #[error("Invalid cadence: {0}")]
    Cadence(String),

    #[error("Schema mismatch for {key}: {reason}")]
    Schema { key: String, reason: String },

    #[error("Unknown ticker: {0}")]
    TickerNotFound(String),

    // Worker errors
    #[error("Action error: {0}")]
    Action(String),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TentacleError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    pub fn cadence(msg: impl Into<String>) -> Self {
        Self::Cadence(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn action(msg: impl Into<String>) -> Self {
        Self::Action(msg.into())
    }

    /// True for infrastructure failures that are safe to retry on the
    /// next tick or delivery attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Broker(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TentacleError::Store("connection refused".into());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(TentacleError::store("x"), TentacleError::Store(_)));
        assert!(matches!(
            TentacleError::broker("x"),
            TentacleError::Broker(_)
        ));
        assert!(matches!(
            TentacleError::cadence("x"),
            TentacleError::Cadence(_)
        ));
        assert!(matches!(
            TentacleError::config("x"),
            TentacleError::Config(_)
        ));
    }

    #[test]
    fn test_transient_taxonomy() {
        assert!(TentacleError::store("down").is_transient());
        assert!(TentacleError::broker("down").is_transient());
        assert!(!TentacleError::VersionConflict("entry/x".into()).is_transient());
        assert!(
            !TentacleError::Schema {
                key: "entry/x".into(),
                reason: "bad".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TentacleError = io_err.into();
        assert!(matches!(err, TentacleError::Io(_)));
    }
}
