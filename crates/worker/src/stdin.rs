use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use relay_common::types::WebhookMessage;
use relay_queue::{InMemoryQueue, QueuePublisher};

/// Publish one JSON message per input line onto `queue` until EOF or shutdown.
///
/// Blank lines are ignored; lines that do not decode as a message are logged
/// and skipped. Returns the number of messages published.
pub async fn feed_lines<R>(
    reader: R,
    queue: &InMemoryQueue,
    shutdown: &CancellationToken,
) -> anyhow::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut published = 0u64;

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            tracing::info!(published, "Input closed");
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<WebhookMessage>(line) {
            Ok(message) => {
                queue.publish(&message).await?;
                published += 1;
                tracing::debug!(
                    notification_id = %message.notification_id,
                    "Queued message from input"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping input line that is not a webhook message");
            }
        }
    }

    Ok(published)
}
