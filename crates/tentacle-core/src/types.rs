//! Data model shared across the scheduler, broker, and workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque reference to the work an invocation performs: an action name
/// resolved by the worker's registry plus a freeform argument blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRef {
    /// Registered action name ("webhook", "log", ...).
    pub name: String,
    /// Arguments passed to the action, interpreted by the action itself.
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ActionRef {
    pub fn new(name: &str, args: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            args,
        }
    }
}

/// One concrete, time-stamped request to execute a schedule entry's action.
///
/// Created by the scheduler core, carried by the broker, consumed by a
/// worker. Delivery is at-least-once: workers may see the same invocation
/// id more than once and must tolerate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique invocation id (uuid v4).
    pub id: String,
    /// Name of the schedule entry that produced this invocation.
    pub entry_name: String,
    /// The time the entry was due (its next_due at dispatch).
    pub scheduled_for: DateTime<Utc>,
    /// Wall-clock time the scheduler published this invocation.
    pub dispatched_at: DateTime<Utc>,
    /// What to execute.
    pub action: ActionRef,
}

impl Invocation {
    /// Build an invocation for a due entry.
    pub fn new(
        entry_name: &str,
        scheduled_for: DateTime<Utc>,
        dispatched_at: DateTime<Utc>,
        action: ActionRef,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entry_name: entry_name.to_string(),
            scheduled_for,
            dispatched_at,
            action,
        }
    }
}

/// Result of executing an invocation, written back to the entry record
/// by the worker that ran it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { finished_at: DateTime<Utc> },
    Failed { reason: String, finished_at: DateTime<Utc> },
}

impl Outcome {
    pub fn success(finished_at: DateTime<Utc>) -> Self {
        Self::Success { finished_at }
    }

    pub fn failed(reason: impl Into<String>, finished_at: DateTime<Utc>) -> Self {
        Self::Failed {
            reason: reason.into(),
            finished_at,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_ids_unique() {
        let now = Utc::now();
        let action = ActionRef::new("log", serde_json::json!({}));
        let a = Invocation::new("daily-report", now, now, action.clone());
        let b = Invocation::new("daily-report", now, now, action);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_invocation_roundtrip() {
        let now = Utc::now();
        let inv = Invocation::new(
            "daily-report",
            now,
            now,
            ActionRef::new("webhook", serde_json::json!({"url": "http://localhost/x"})),
        );
        let json = serde_json::to_string(&inv).unwrap();
        let back: Invocation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, inv.id);
        assert_eq!(back.entry_name, "daily-report");
        assert_eq!(back.action.name, "webhook");
    }

    #[test]
    fn test_outcome_status() {
        let now = Utc::now();
        assert!(Outcome::success(now).is_success());
        assert!(!Outcome::failed("timeout", now).is_success());
    }
}
