//! Integration tests against a live Redis.
//!
//! Run with `REDIS_URL=redis://localhost:6379 cargo test -p relay-queue -- --ignored`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use relay_common::redis_pool::create_redis_pool;
use relay_common::types::WebhookMessage;
use relay_queue::{
    MessageConsumer, MessageHandler, QueueConsumer, QueuePublisher, RedisPublisher,
    RedisTransport, Transport,
};

async fn connect() -> ConnectionManager {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    create_redis_pool(&url).await.expect("Redis must be running")
}

async fn list_len(conn: &mut ConnectionManager, key: &str) -> i64 {
    redis::cmd("LLEN").arg(key).query_async(conn).await.unwrap()
}

async fn cleanup(conn: &mut ConnectionManager, keys: &[&str]) {
    let _: () = redis::cmd("DEL").arg(keys).query_async(conn).await.unwrap();
}

fn unique_queue() -> String {
    format!("relay-test:{}", Uuid::new_v4())
}

struct FailFirst {
    calls: AtomicUsize,
}

#[async_trait]
impl MessageHandler for FailFirst {
    async fn handle(
        &self,
        _message: WebhookMessage,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("first delivery fails");
        }
        Ok(())
    }
}

#[tokio::test]
#[ignore]
async fn test_requeue_then_ack_leaves_lists_empty() {
    let mut conn = connect().await;
    let queue = unique_queue();

    let publisher = RedisPublisher::new(conn.clone(), &queue);
    let message = WebhookMessage::new(Uuid::new_v4(), "https://example.com/hook", "{}");
    publisher.publish(&message).await.unwrap();

    let transport = RedisTransport::new(connect().await, &queue, "test");
    let processing = transport.processing().to_string();
    let consumer = QueueConsumer::new(transport, CancellationToken::new());
    let handler = Arc::new(FailFirst {
        calls: AtomicUsize::new(0),
    });

    consumer.start(handler.clone()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while handler.calls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    consumer.stop().await.unwrap();

    assert_eq!(list_len(&mut conn, &queue).await, 0);
    assert_eq!(list_len(&mut conn, &processing).await, 0);

    cleanup(&mut conn, &[&queue, &processing]).await;
}

#[tokio::test]
#[ignore]
async fn test_recover_returns_orphaned_messages() {
    let mut conn = connect().await;
    let queue = unique_queue();
    let transport = RedisTransport::new(conn.clone(), &queue, "crashed");

    let _: () = redis::cmd("LPUSH")
        .arg(transport.processing())
        .arg(r#"{"orphan":true}"#)
        .query_async(&mut conn)
        .await
        .unwrap();

    transport.recover().await.unwrap();

    assert_eq!(list_len(&mut conn, &queue).await, 1);
    assert_eq!(list_len(&mut conn, transport.processing()).await, 0);

    let processing = transport.processing().to_string();
    cleanup(&mut conn, &[&queue, &processing]).await;
}

#[tokio::test]
#[ignore]
async fn test_undecodable_message_does_not_block_queue() {
    let mut conn = connect().await;
    let queue = unique_queue();

    // Oldest first: the bad body sits at the consuming end.
    let _: () = redis::cmd("LPUSH")
        .arg(&queue)
        .arg("definitely not json")
        .query_async(&mut conn)
        .await
        .unwrap();
    let publisher = RedisPublisher::new(conn.clone(), &queue);
    let message = WebhookMessage::new(Uuid::new_v4(), "https://example.com/hook", "{}");
    publisher.publish(&message).await.unwrap();

    let transport = RedisTransport::new(connect().await, &queue, "poisoned");
    let processing = transport.processing().to_string();
    let consumer = QueueConsumer::new(transport, CancellationToken::new());
    // Starting past zero makes every handled message succeed.
    let handler = Arc::new(FailFirst {
        calls: AtomicUsize::new(1),
    });

    consumer.start(handler.clone()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while handler.calls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    consumer.stop().await.unwrap();

    // Only the undecodable body is left, back on the main queue.
    assert_eq!(list_len(&mut conn, &queue).await, 1);
    assert_eq!(list_len(&mut conn, &processing).await, 0);

    cleanup(&mut conn, &[&queue, &processing]).await;
}
