//! NATS intake subscriber.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::IngestResult;
use crate::model::InboundEvent;

/// Forwards messages from one NATS subject to the front end, in order.
pub struct NatsIntake {
    client: async_nats::Client,
    subject: String,
}

impl NatsIntake {
    pub fn new(client: async_nats::Client, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }

    /// Subscribe and forward in the background until the front end goes away.
    pub async fn spawn(self, tx: mpsc::Sender<InboundEvent>) -> IngestResult<JoinHandle<()>> {
        let mut subscriber = self.client.subscribe(self.subject.clone()).await?;
        tracing::info!(subject = %self.subject, "Subscribed to event intake");

        Ok(tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let event: InboundEvent = match serde_json::from_slice(&message.payload) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping malformed event message");
                        continue;
                    }
                };
                if tx.send(event).await.is_err() {
                    tracing::info!("Front end gone, stopping intake");
                    break;
                }
            }
            tracing::warn!("Event intake subscription ended");
        }))
    }
}
