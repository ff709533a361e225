//! Redis list transport using the reliable-queue pattern.
//!
//! Producers `LPUSH` onto the queue key. A consumer moves one message at a
//! time from the right end of the queue onto its own processing list with
//! `BLMOVE`, so a message is never only in memory. Ack removes it from the
//! processing list. Requeue moves it back to the producer end of the queue in
//! one `MULTI`/`EXEC`, behind everything already waiting, so a message that
//! keeps failing never blocks the rest of the queue.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;

use relay_common::types::WebhookMessage;

use crate::consumer::Transport;
use crate::error::QueueError;
use crate::publisher::QueuePublisher;

/// Seconds a single `BLMOVE` blocks before the loop re-checks for shutdown.
const BLOCK_SECONDS: u64 = 1;

/// Key of the processing list owned by `consumer` on `queue`.
pub fn processing_key(queue: &str, consumer: &str) -> String {
    format!("{}:processing:{}", queue, consumer)
}

/// A message moved onto this consumer's processing list.
#[derive(Debug)]
pub struct RedisDelivery {
    body: String,
}

/// Consuming side of a Redis list queue.
///
pub struct RedisTransport {
    conn: ConnectionManager,
    queue: String,
    processing: String,
}

impl RedisTransport {
    /// `conn` must not be shared with other consumers: each `BLMOVE` blocks
    /// it for up to a second, stalling anything multiplexed onto it.
    /// `consumer` must be unique per running consumer; it names the
    /// processing list recovered on start.
    pub fn new(conn: ConnectionManager, queue: &str, consumer: &str) -> Self {
        Self {
            conn,
            queue: queue.to_string(),
            processing: processing_key(queue, consumer),
        }
    }

    pub fn processing(&self) -> &str {
        &self.processing
    }
}

#[async_trait]
impl Transport for RedisTransport {
    type Delivery = RedisDelivery;

    const NAME: &'static str = "redis";

    async fn recover(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let mut recovered = 0u64;

        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(&self.processing)
                .arg(&self.queue)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;

            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            tracing::warn!(
                queue = %self.queue,
                processing = %self.processing,
                recovered,
                "Returned unacknowledged messages to the queue"
            );
        }

        Ok(())
    }

    async fn receive(
        &self,
        _stopping: &CancellationToken,
    ) -> Result<Option<RedisDelivery>, QueueError> {
        let mut conn = self.conn.clone();

        // Not raced against `stopping`: dropping a BLMOVE mid-flight could
        // strand a message on the processing list until the next start.
        let body: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.queue)
            .arg(&self.processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(BLOCK_SECONDS)
            .query_async(&mut conn)
            .await?;

        Ok(body.map(|body| RedisDelivery { body }))
    }

    fn body(delivery: &RedisDelivery) -> &str {
        &delivery.body
    }

    async fn ack(&self, delivery: RedisDelivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LREM")
            .arg(&self.processing)
            .arg(1)
            .arg(&delivery.body)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn requeue(&self, delivery: RedisDelivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.processing)
            .arg(1)
            .arg(&delivery.body)
            .ignore()
            .cmd("LPUSH")
            .arg(&self.queue)
            .arg(&delivery.body)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// Producing side of a Redis list queue.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: ConnectionManager,
    queue: String,
}

impl RedisPublisher {
    pub fn new(conn: ConnectionManager, queue: &str) -> Self {
        Self {
            conn,
            queue: queue.to_string(),
        }
    }
}

#[async_trait]
impl QueuePublisher for RedisPublisher {
    async fn publish(&self, message: &WebhookMessage) -> Result<(), QueueError> {
        let body = serde_json::to_string(message)?;
        let mut conn = self.conn.clone();

        let depth: i64 = redis::cmd("LPUSH")
            .arg(&self.queue)
            .arg(&body)
            .query_async(&mut conn)
            .await?;

        tracing::debug!(
            queue = %self.queue,
            notification_id = %message.notification_id,
            depth,
            "Message published"
        );
        Ok(())
    }
}
