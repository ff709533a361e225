use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use relay_common::config::{AppConfig, TransportKind};
use relay_common::redis_pool::create_redis_pool;
use relay_queue::{InMemoryQueue, MessageConsumer, QueueConsumer, RedisTransport};
use relay_worker::{Dispatcher, build_sender};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_worker=info,relay_notifier=info,relay_queue=info".into()),
        )
        .json()
        .init();

    tracing::info!("Webhook relay worker starting...");

    let config = AppConfig::from_env()?;
    tracing::info!(
        transport = %config.messaging_provider,
        sender = %config.webhook_provider,
        queue = %config.queue_name,
        consumer = %config.consumer_name,
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let handler = Arc::new(Dispatcher::new(build_sender(&config)?));

    let consumer: Box<dyn MessageConsumer> = match config.messaging_provider {
        TransportKind::Redis => {
            let conn = create_redis_pool(&config.redis_url).await?;
            let transport = RedisTransport::new(conn, &config.queue_name, &config.consumer_name);
            Box::new(QueueConsumer::new(transport, shutdown.clone()))
        }
        TransportKind::Memory => {
            let queue = InMemoryQueue::new();
            let feeder_queue = queue.clone();
            let feeder_shutdown = shutdown.clone();
            tokio::spawn(async move {
                let reader = BufReader::new(tokio::io::stdin());
                if let Err(e) =
                    relay_worker::stdin::feed_lines(reader, &feeder_queue, &feeder_shutdown).await
                {
                    tracing::error!(error = %e, "Failed to read messages from stdin");
                }
            });
            Box::new(QueueConsumer::new(queue, shutdown.clone()))
        }
    };

    consumer.start(handler).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, draining in-flight message...");

    // Past the grace period, abort the in-flight delivery; it is requeued.
    let grace = Duration::from_secs(config.shutdown_grace_seconds);
    let deadline = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(grace).await;
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Grace period elapsed, cancelling in-flight delivery"
            );
            shutdown.cancel();
        }
    });

    consumer.stop().await?;
    deadline.abort();
    shutdown.cancel();

    tracing::info!("Webhook relay worker stopped.");
    Ok(())
}
