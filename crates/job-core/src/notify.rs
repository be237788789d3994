//! Best-effort status-changed notifications.
//!
//! Listeners are interested parties (dashboards, websocket relays); a failed
//! broadcast never fails the operation that triggered it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{TaskId, TaskNode, TaskStatus};

/// Default NATS subject for status notifications.
pub const DEFAULT_STATUS_SUBJECT: &str = "jobs.status";

/// `{task_id, status, ...extra}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StatusChange {
    pub fn new(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id,
            status,
            extra: serde_json::Map::new(),
        }
    }

    /// Status change of `task`, tagged with its kind and name.
    pub fn for_task(task: &TaskNode) -> Self {
        Self::new(task.id, task.status)
            .with("kind", task.kind.as_str())
            .with("name", task.name.as_str())
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Sink for status-changed notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, change: StatusChange);
}

/// Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _change: StatusChange) {}
}

/// In-process fan-out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<StatusChange>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, change: StatusChange) {
        // No subscribers is not an error.
        let _ = self.tx.send(change);
    }
}

/// Publishes notifications as JSON on a NATS subject.
#[derive(Clone)]
pub struct NatsNotifier {
    client: async_nats::Client,
    subject: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, subject: Option<&str>) -> Self {
        Self {
            client,
            subject: subject.unwrap_or(DEFAULT_STATUS_SUBJECT).to_string(),
        }
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn notify(&self, change: StatusChange) {
        let payload = match serde_json::to_vec(&change) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(task_id = change.task_id, error = %e, "Failed to encode status change");
                return;
            }
        };

        if let Err(e) = self.client.publish(self.subject.clone(), payload.into()).await {
            tracing::warn!(
                task_id = change.task_id,
                status = %change.status,
                error = %e,
                "Failed to publish status change"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_change_serialization_flattens_extra() {
        let change = StatusChange::new(42, TaskStatus::Failed).with("explanation", "orphaned");
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["task_id"], 42);
        assert_eq!(json["status"], "failed");
        assert_eq!(json["explanation"], "orphaned");
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.notify(StatusChange::new(1, TaskStatus::Running)).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.task_id, 1);
        assert_eq!(received.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        notifier.notify(StatusChange::new(1, TaskStatus::Running)).await;
    }
}
