//! In-process queue with the same consumer contract as the Redis transport.
//!
//! Used for local runs (the worker feeds it from stdin) and for tests.
//! Requeued messages go to the back of the channel with their redelivery
//! counter bumped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use relay_common::types::WebhookMessage;

use crate::consumer::Transport;
use crate::error::QueueError;
use crate::publisher::QueuePublisher;

#[derive(Debug)]
pub struct Envelope {
    body: String,
    redeliveries: u32,
}

struct Inner {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    acked: AtomicU64,
    requeued: AtomicU64,
}

/// Unbounded in-memory queue. Clones share the same channel and counters.
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                tx,
                rx: Mutex::new(rx),
                acked: AtomicU64::new(0),
                requeued: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue a raw body without checking that it decodes.
    pub fn publish_raw(&self, body: impl Into<String>) -> Result<(), QueueError> {
        self.push(Envelope {
            body: body.into(),
            redeliveries: 0,
        })
    }

    /// Messages acknowledged so far.
    pub fn acked(&self) -> u64 {
        self.inner.acked.load(Ordering::SeqCst)
    }

    /// Messages requeued so far, counting each redelivery.
    pub fn requeued(&self) -> u64 {
        self.inner.requeued.load(Ordering::SeqCst)
    }

    fn push(&self, envelope: Envelope) -> Result<(), QueueError> {
        self.inner.tx.send(envelope).map_err(|_| QueueError::Closed)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueuePublisher for InMemoryQueue {
    async fn publish(&self, message: &WebhookMessage) -> Result<(), QueueError> {
        self.publish_raw(serde_json::to_string(message)?)
    }
}

#[async_trait]
impl Transport for InMemoryQueue {
    type Delivery = Envelope;

    const NAME: &'static str = "memory";

    async fn receive(&self, stopping: &CancellationToken) -> Result<Option<Envelope>, QueueError> {
        let mut rx = self.inner.rx.lock().await;
        tokio::select! {
            biased;
            _ = stopping.cancelled() => Ok(None),
            envelope = rx.recv() => envelope.map(Some).ok_or(QueueError::Closed),
        }
    }

    fn body(delivery: &Envelope) -> &str {
        &delivery.body
    }

    fn redeliveries(delivery: &Envelope) -> Option<u32> {
        Some(delivery.redeliveries)
    }

    async fn ack(&self, _delivery: Envelope) -> Result<(), QueueError> {
        self.inner.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn requeue(&self, delivery: Envelope) -> Result<(), QueueError> {
        self.inner.requeued.fetch_add(1, Ordering::SeqCst);
        self.push(Envelope {
            body: delivery.body,
            redeliveries: delivery.redeliveries.saturating_add(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::Notify;
    use uuid::Uuid;

    use super::*;
    use crate::consumer::{MessageConsumer, MessageHandler, QueueConsumer};

    fn message(id: Uuid) -> WebhookMessage {
        WebhookMessage::new(id, "https://example.com/hook", r#"{"a":1}"#)
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Records every id it sees, optionally sleeping and tracking overlap.
    #[derive(Default)]
    struct Recorder {
        seen: std::sync::Mutex<Vec<Uuid>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(
            &self,
            message: WebhookMessage,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.seen.lock().unwrap().push(message.notification_id);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_messages_are_handled_in_order() {
        let queue = InMemoryQueue::new();
        let consumer = QueueConsumer::new(queue.clone(), CancellationToken::new());
        let recorder = Arc::new(Recorder::default());

        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.publish(&message(*id)).await.unwrap();
        }

        consumer.start(recorder.clone()).await.unwrap();
        wait_until(|| queue.acked() == 5).await;
        consumer.stop().await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), ids);
        assert_eq!(queue.requeued(), 0);
    }

    #[tokio::test]
    async fn test_one_message_in_flight_at_a_time() {
        let queue = InMemoryQueue::new();
        let consumer = QueueConsumer::new(queue.clone(), CancellationToken::new());
        let recorder = Arc::new(Recorder {
            delay: Duration::from_millis(20),
            ..Default::default()
        });

        consumer.start(recorder.clone()).await.unwrap();
        for _ in 0..5 {
            queue.publish(&message(Uuid::new_v4())).await.unwrap();
        }
        wait_until(|| queue.acked() == 5).await;
        consumer.stop().await.unwrap();

        assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
    }

    /// Fails the first time it sees each id, succeeds afterwards.
    #[derive(Default)]
    struct FailOnce {
        failed: std::sync::Mutex<HashSet<Uuid>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for FailOnce {
        async fn handle(
            &self,
            message: WebhookMessage,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failed.lock().unwrap().insert(message.notification_id) {
                anyhow::bail!("transient failure");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_error_requeues_then_redelivers() {
        let queue = InMemoryQueue::new();
        let consumer = QueueConsumer::new(queue.clone(), CancellationToken::new());
        let handler = Arc::new(FailOnce::default());

        queue.publish(&message(Uuid::new_v4())).await.unwrap();
        consumer.start(handler.clone()).await.unwrap();
        wait_until(|| queue.acked() == 1).await;
        consumer.stop().await.unwrap();

        assert_eq!(queue.requeued(), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_requeued() {
        let queue = InMemoryQueue::new();
        let consumer = QueueConsumer::new(queue.clone(), CancellationToken::new());
        let recorder = Arc::new(Recorder::default());

        queue.publish_raw("definitely not json").unwrap();
        consumer.start(recorder.clone()).await.unwrap();
        wait_until(|| queue.requeued() >= 1).await;
        consumer.stop().await.unwrap();

        assert_eq!(queue.acked(), 0);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_message_does_not_block_or_spin() {
        let queue = InMemoryQueue::new();
        let consumer = QueueConsumer::new(queue.clone(), CancellationToken::new());
        let recorder = Arc::new(Recorder::default());

        let good = Uuid::new_v4();
        queue.publish_raw("definitely not json").unwrap();
        queue.publish(&message(good)).await.unwrap();

        consumer.start(recorder.clone()).await.unwrap();
        wait_until(|| queue.acked() == 1).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        consumer.stop().await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec![good]);
        let requeued = queue.requeued();
        assert!(requeued >= 1);
        assert!(requeued <= 10, "requeued {requeued} times in ~300ms");
    }

    #[tokio::test]
    async fn test_start_twice_or_after_stop_is_rejected() {
        let queue = InMemoryQueue::new();
        let consumer = QueueConsumer::new(queue, CancellationToken::new());
        let recorder = Arc::new(Recorder::default());

        consumer.start(recorder.clone()).await.unwrap();
        assert!(matches!(
            consumer.start(recorder.clone()).await,
            Err(QueueError::AlreadyStarted)
        ));

        consumer.stop().await.unwrap();
        assert!(matches!(
            consumer.start(recorder).await,
            Err(QueueError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_stop_before_start_closes_consumer() {
        let consumer = QueueConsumer::new(InMemoryQueue::new(), CancellationToken::new());
        consumer.stop().await.unwrap();
        assert!(matches!(
            consumer.start(Arc::new(Recorder::default())).await,
            Err(QueueError::Closed)
        ));
    }

    /// Signals when it starts, then either finishes after `delay` or, if
    /// `until_cancelled`, waits for the shutdown token and fails.
    struct Blocking {
        started: Notify,
        delay: Duration,
        until_cancelled: bool,
    }

    #[async_trait]
    impl MessageHandler for Blocking {
        async fn handle(
            &self,
            _message: WebhookMessage,
            cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            self.started.notify_one();
            if self.until_cancelled {
                cancel.cancelled().await;
                anyhow::bail!("delivery cancelled");
            }
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_drains_in_flight_message() {
        let queue = InMemoryQueue::new();
        let consumer = QueueConsumer::new(queue.clone(), CancellationToken::new());
        let handler = Arc::new(Blocking {
            started: Notify::new(),
            delay: Duration::from_millis(200),
            until_cancelled: false,
        });

        queue.publish(&message(Uuid::new_v4())).await.unwrap();
        queue.publish(&message(Uuid::new_v4())).await.unwrap();
        consumer.start(handler.clone()).await.unwrap();
        handler.started.notified().await;
        consumer.stop().await.unwrap();

        // The in-flight message completes; the second one is never taken.
        assert_eq!(queue.acked(), 1);
        assert_eq!(queue.requeued(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_requeues_in_flight_message() {
        let queue = InMemoryQueue::new();
        let shutdown = CancellationToken::new();
        let consumer = QueueConsumer::new(queue.clone(), shutdown.clone());
        let handler = Arc::new(Blocking {
            started: Notify::new(),
            delay: Duration::ZERO,
            until_cancelled: true,
        });

        queue.publish(&message(Uuid::new_v4())).await.unwrap();
        consumer.start(handler.clone()).await.unwrap();
        handler.started.notified().await;

        shutdown.cancel();
        consumer.stop().await.unwrap();

        assert_eq!(queue.acked(), 0);
        assert_eq!(queue.requeued(), 1);
    }
}
