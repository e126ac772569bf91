//! Actions — what an invocation actually executes.
//!
//! The scheduler treats the action as an opaque name plus an argument
//! blob; workers resolve the name through this registry. Built-ins:
//! `webhook` (HTTP request) and `log` (record the payload).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tentacle_core::{Invocation, Result, TentacleError};

/// A runnable action. Implementations must be idempotent or tolerate
/// duplicate invocations (delivery is at-least-once).
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, invocation: &Invocation) -> Result<()>;
}

/// Name → action resolution, fixed at worker startup.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Registry with the built-in actions.
    pub fn new(action_timeout: Duration) -> Self {
        let mut registry = Self {
            actions: HashMap::new(),
        };
        registry.register("log", Arc::new(LogAction));
        registry.register("webhook", Arc::new(WebhookAction::new(action_timeout)));
        registry
    }

    pub fn register(&mut self, name: &str, action: Arc<dyn Action>) {
        self.actions.insert(name.to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }
}

/// Record the invocation payload in the log. The no-infrastructure
/// action: useful for wiring checks and as a template.
pub struct LogAction;

#[async_trait]
impl Action for LogAction {
    async fn execute(&self, invocation: &Invocation) -> Result<()> {
        tracing::info!(
            "[{}] invocation {} args={}",
            invocation.entry_name,
            invocation.id,
            invocation.action.args
        );
        Ok(())
    }
}

/// Fire an HTTP request described by the action args:
/// `{"url": ..., "method": "POST", "body": ..., "headers": [[k, v], ...]}`.
/// Non-2xx responses count as failures.
pub struct WebhookAction {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookAction {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl Action for WebhookAction {
    async fn execute(&self, invocation: &Invocation) -> Result<()> {
        let args = &invocation.action.args;
        let url = args["url"]
            .as_str()
            .ok_or_else(|| TentacleError::action("webhook action needs a 'url' argument"))?;
        let method = args["method"].as_str().unwrap_or("POST");

        let mut req = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            _ => self.client.post(url),
        };

        if let Some(body) = args["body"].as_str() {
            req = req
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }
        if let Some(headers) = args["headers"].as_array() {
            for pair in headers {
                if let (Some(key), Some(value)) = (pair[0].as_str(), pair[1].as_str()) {
                    req = req.header(key, value);
                }
            }
        }

        let resp = req
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TentacleError::Action(format!("webhook send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!(
                "webhook for '{}' returned {}",
                invocation.entry_name,
                resp.status()
            );
            Ok(())
        } else {
            Err(TentacleError::Action(format!(
                "webhook for '{}' returned {}",
                invocation.entry_name,
                resp.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tentacle_core::ActionRef;

    fn invocation(action: ActionRef) -> Invocation {
        let now = chrono::Utc::now();
        Invocation::new("test-entry", now, now, action)
    }

    #[tokio::test]
    async fn test_registry_builtin_lookup() {
        let registry = ActionRegistry::new(Duration::from_secs(5));
        assert!(registry.get("log").is_some());
        assert!(registry.get("webhook").is_some());
        assert!(registry.get("teleport").is_none());
    }

    #[tokio::test]
    async fn test_log_action_always_succeeds() {
        let inv = invocation(ActionRef::new("log", serde_json::json!({"note": "hi"})));
        assert!(LogAction.execute(&inv).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_requires_url() {
        let action = WebhookAction::new(Duration::from_secs(5));
        let inv = invocation(ActionRef::new("webhook", serde_json::json!({})));
        let err = action.execute(&inv).await.unwrap_err();
        assert!(err.to_string().contains("url"));
    }
}
