//! Scheduler control channel.
//!
//! Requests are `{"pause": <bool>}`; an empty object only asks for a rebuild.
//! Every request is answered with the fixed literal [`CONTROL_ACK`]. Messages
//! from NATS and in-process wakeups land in the same bounded queue, which the
//! daemon drains without blocking.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{SchedulerError, SchedulerResult};

/// Reply sent for every control request.
pub const CONTROL_ACK: &str = "ack";

const QUEUE_SIZE: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause: Option<bool>,
}

impl ControlMessage {
    pub fn wake() -> Self {
        Self::default()
    }

    pub fn pause(paused: bool) -> Self {
        Self { pause: Some(paused) }
    }
}

/// Non-blocking source of control messages.
pub trait ControlReceiver: Send {
    /// Next queued message, `Ok(None)` when the queue is empty.
    fn try_recv(&mut self) -> SchedulerResult<Option<ControlMessage>>;
}

/// Sending side of the in-process control queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlMessage>,
}

impl ControlHandle {
    /// Queue a message. A full queue already guarantees a rebuild, so the
    /// message is dropped and only a pause change is logged.
    pub fn send(&self, message: ControlMessage) {
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.tx.try_send(message) {
            if dropped.pause.is_some() {
                tracing::warn!(?dropped, "Control queue full, dropping message");
            }
        }
    }

    /// Ask for a rebuild on the next poll.
    pub fn wake(&self) {
        self.send(ControlMessage::wake());
    }
}

/// Receiving side of the in-process control queue.
#[derive(Debug)]
pub struct ControlInbox {
    rx: mpsc::Receiver<ControlMessage>,
}

impl ControlReceiver for ControlInbox {
    fn try_recv(&mut self) -> SchedulerResult<Option<ControlMessage>> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(SchedulerError::Control("control queue closed".to_string()))
            }
        }
    }
}

/// Create a connected handle/inbox pair.
pub fn channel() -> (ControlHandle, ControlInbox) {
    let (tx, rx) = mpsc::channel(QUEUE_SIZE);
    (ControlHandle { tx }, ControlInbox { rx })
}

/// Answers control requests on a NATS subject and forwards them to the
/// in-process queue.
pub struct NatsControlListener {
    client: async_nats::Client,
    subject: String,
    handle: ControlHandle,
}

impl NatsControlListener {
    pub fn new(client: async_nats::Client, subject: impl Into<String>, handle: ControlHandle) -> Self {
        Self {
            client,
            subject: subject.into(),
            handle,
        }
    }

    /// Subscribe and serve requests in a background task.
    ///
    /// The task only returns when the subscription ends.
    pub async fn spawn(self) -> SchedulerResult<JoinHandle<()>> {
        let mut subscriber = self.client.subscribe(self.subject.clone()).await?;
        tracing::info!(subject = %self.subject, "Control listener subscribed");

        Ok(tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let message = match serde_json::from_slice::<ControlMessage>(&msg.payload) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed control message, treating as wakeup");
                        ControlMessage::wake()
                    }
                };
                tracing::debug!(?message, "Control message received");
                self.handle.send(message);

                if let Some(reply) = msg.reply {
                    if let Err(e) = self.client.publish(reply, CONTROL_ACK.into()).await {
                        tracing::warn!(error = %e, "Failed to acknowledge control message");
                    }
                }
            }
            tracing::error!(subject = %self.subject, "Control subscription ended");
        }))
    }
}

/// Publish a control message without waiting for the acknowledgement.
///
/// No listener on the subject is not an error.
pub async fn send_control(
    client: &async_nats::Client,
    subject: &str,
    message: &ControlMessage,
) -> SchedulerResult<()> {
    let payload = serde_json::to_vec(message).map_err(|e| SchedulerError::Control(e.to_string()))?;
    client
        .publish(subject.to_string(), payload.into())
        .await
        .map_err(|e| SchedulerError::Control(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_message_wire_format() {
        let pause: ControlMessage = serde_json::from_str(r#"{"pause": true}"#).unwrap();
        assert_eq!(pause, ControlMessage::pause(true));

        let wake: ControlMessage = serde_json::from_str("{}").unwrap();
        assert_eq!(wake, ControlMessage::wake());

        assert_eq!(serde_json::to_string(&ControlMessage::pause(false)).unwrap(), r#"{"pause":false}"#);
    }

    #[tokio::test]
    async fn test_inbox_is_non_blocking() {
        let (handle, mut inbox) = channel();
        assert_eq!(inbox.try_recv().unwrap(), None);

        handle.send(ControlMessage::pause(true));
        handle.wake();
        assert_eq!(inbox.try_recv().unwrap(), Some(ControlMessage::pause(true)));
        assert_eq!(inbox.try_recv().unwrap(), Some(ControlMessage::wake()));
        assert_eq!(inbox.try_recv().unwrap(), None);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (handle, mut inbox) = channel();
        for _ in 0..(QUEUE_SIZE + 10) {
            handle.wake();
        }
        let mut drained = 0;
        while inbox.try_recv().unwrap().is_some() {
            drained += 1;
        }
        assert_eq!(drained, QUEUE_SIZE);
    }

    #[tokio::test]
    async fn test_inbox_reports_closed_queue() {
        let (handle, mut inbox) = channel();
        drop(handle);
        assert!(inbox.try_recv().is_err());
    }
}
