//! Broker-agnostic consumer contract.
//!
//! Per message:
//!
//! ```text
//! Received ─► Processing ─┬─ handler Ok  ─► Acknowledged
//!                         └─ handler Err ─► Requeued (redelivered later)
//! ```
//!
//! A [`QueueConsumer`] handles at most one message at a time, so messages are
//! settled in the order they were received. Run several consumers for
//! throughput. There is no redelivery ceiling: a message that always fails is
//! requeued forever and shows up as repeated warnings. After each requeue the
//! loop pauses briefly, and transports requeue to the back of the queue, so
//! such a message neither spins the consumer nor holds up other messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_common::error::AppError;
use relay_common::types::WebhookMessage;

use crate::error::QueueError;

/// Pause after a failed receive before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Pause after requeueing, so a message that always fails is not spun on.
const REQUEUE_BACKOFF: Duration = Duration::from_millis(100);

/// Processes one decoded message. Returning `Err` requeues the message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        message: WebhookMessage,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Receive loop over some transport, started once and stopped once.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Begin receiving. Returns once the receive loop is running.
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<(), QueueError>;

    /// Stop taking new messages and wait for the in-flight one to settle.
    async fn stop(&self) -> Result<(), QueueError>;
}

/// What to do with a message once its handler returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Requeue,
}

/// Broker-specific half of a consumer: receive, ack and requeue.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Transport-owned envelope; never leaves the consumer.
    type Delivery: Send;

    /// Short name for logs.
    const NAME: &'static str;

    /// Return messages orphaned by a previous run to the queue.
    async fn recover(&self) -> Result<(), QueueError> {
        Ok(())
    }

    /// Wait for the next message.
    ///
    /// `Ok(None)` means nothing arrived in this poll window or `stopping`
    /// fired; the loop checks `stopping` and polls again.
    async fn receive(
        &self,
        stopping: &CancellationToken,
    ) -> Result<Option<Self::Delivery>, QueueError>;

    fn body(delivery: &Self::Delivery) -> &str;

    /// How many times this message was requeued before, if the transport knows.
    fn redeliveries(_delivery: &Self::Delivery) -> Option<u32> {
        None
    }

    async fn ack(&self, delivery: Self::Delivery) -> Result<(), QueueError>;

    async fn requeue(&self, delivery: Self::Delivery) -> Result<(), QueueError>;
}

/// Decode a raw message body and run the handler on it.
pub async fn process_message(
    handler: &dyn MessageHandler,
    body: &str,
    cancel: &CancellationToken,
) -> Settlement {
    let message: WebhookMessage = match serde_json::from_str(body) {
        Ok(message) => message,
        Err(e) => {
            log_requeue(&anyhow::Error::from(AppError::from(e)), None);
            return Settlement::Requeue;
        }
    };

    let notification_id = message.notification_id;
    match handler.handle(message, cancel).await {
        Ok(()) => Settlement::Ack,
        Err(e) => {
            log_requeue(&e, Some(notification_id.to_string()));
            Settlement::Requeue
        }
    }
}

fn log_requeue(error: &anyhow::Error, notification_id: Option<String>) {
    if error.downcast_ref::<AppError>().is_some() {
        tracing::error!(
            notification_id = notification_id.as_deref().unwrap_or("unknown"),
            error = %error,
            "Message can never succeed but will be requeued"
        );
    } else {
        tracing::warn!(
            notification_id = notification_id.as_deref().unwrap_or("unknown"),
            error = %error,
            "Error processing message, requeueing"
        );
    }
}

/// A consumer running a single-concurrency receive loop over a [`Transport`].
pub struct QueueConsumer<T: Transport> {
    transport: Arc<T>,
    shutdown: CancellationToken,
    stopping: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> QueueConsumer<T> {
    /// `shutdown` is handed to every handler invocation. Cancelling it aborts
    /// the in-flight delivery (which then requeues) and stops the loop.
    pub fn new(transport: T, shutdown: CancellationToken) -> Self {
        Self {
            transport: Arc::new(transport),
            stopping: shutdown.child_token(),
            shutdown,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<T: Transport> MessageConsumer for QueueConsumer<T> {
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<(), QueueError> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(QueueError::AlreadyStarted);
        }
        if self.stopping.is_cancelled() {
            return Err(QueueError::Closed);
        }

        self.transport.recover().await?;

        *task = Some(tokio::spawn(run(
            self.transport.clone(),
            handler,
            self.stopping.clone(),
            self.shutdown.clone(),
        )));

        tracing::info!(transport = T::NAME, "Consumer started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), QueueError> {
        self.stopping.cancel();

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(transport = T::NAME, error = %e, "Consumer task failed");
            }
        }

        tracing::info!(transport = T::NAME, "Consumer stopped");
        Ok(())
    }
}

async fn run<T: Transport>(
    transport: Arc<T>,
    handler: Arc<dyn MessageHandler>,
    stopping: CancellationToken,
    shutdown: CancellationToken,
) {
    loop {
        if stopping.is_cancelled() {
            break;
        }

        let delivery = match transport.receive(&stopping).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(QueueError::Closed) => {
                tracing::info!(transport = T::NAME, "Queue closed, consumer exiting");
                break;
            }
            Err(e) => {
                tracing::error!(transport = T::NAME, error = %e, "Failed to receive message");
                tokio::select! {
                    _ = stopping.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => continue,
                }
            }
        };

        let redeliveries = T::redeliveries(&delivery);
        let settlement = process_message(handler.as_ref(), T::body(&delivery), &shutdown).await;

        let settled = match settlement {
            Settlement::Ack => transport.ack(delivery).await,
            Settlement::Requeue => transport.requeue(delivery).await,
        };

        match (settlement, settled) {
            (Settlement::Ack, Ok(())) => {
                tracing::debug!(transport = T::NAME, "Message acknowledged");
            }
            (Settlement::Requeue, Ok(())) => {
                tracing::warn!(
                    transport = T::NAME,
                    previous_redeliveries = ?redeliveries,
                    "Message requeued"
                );
                tokio::select! {
                    _ = stopping.cancelled() => break,
                    _ = tokio::time::sleep(REQUEUE_BACKOFF) => {}
                }
            }
            (settlement, Err(e)) => {
                tracing::error!(
                    transport = T::NAME,
                    ?settlement,
                    error = %e,
                    "Failed to settle message"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use relay_common::error::ValidationError;

    use super::*;

    struct RecordingHandler {
        calls: AtomicUsize,
        fail_with: Option<fn() -> anyhow::Error>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(
            &self,
            _message: WebhookMessage,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(make_error) => Err(make_error()),
                None => Ok(()),
            }
        }
    }

    const VALID: &str = r#"{
        "notificationId": "6f1c1f4e-1d2b-4c41-9a8e-4f2f0f9c2a11",
        "webhookUrl": "https://example.com/hook",
        "payload": "{}"
    }"#;

    #[tokio::test]
    async fn test_handler_success_acks() {
        let handler = RecordingHandler {
            calls: AtomicUsize::new(0),
            fail_with: None,
        };
        let settlement = process_message(&handler, VALID, &CancellationToken::new()).await;
        assert_eq!(settlement, Settlement::Ack);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_requeues() {
        let handler = RecordingHandler {
            calls: AtomicUsize::new(0),
            fail_with: Some(|| anyhow::Error::from(AppError::from(ValidationError::EmptyPayload))),
        };
        let settlement = process_message(&handler, VALID, &CancellationToken::new()).await;
        assert_eq!(settlement, Settlement::Requeue);

        let handler = RecordingHandler {
            calls: AtomicUsize::new(0),
            fail_with: Some(|| anyhow::anyhow!("boom")),
        };
        let settlement = process_message(&handler, VALID, &CancellationToken::new()).await;
        assert_eq!(settlement, Settlement::Requeue);
    }

    #[tokio::test]
    async fn test_undecodable_body_requeues_without_calling_handler() {
        let handler = RecordingHandler {
            calls: AtomicUsize::new(0),
            fail_with: None,
        };
        for body in ["not json", "{}", r#"{"notificationId":"nope"}"#] {
            let settlement = process_message(&handler, body, &CancellationToken::new()).await;
            assert_eq!(settlement, Settlement::Requeue);
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}
