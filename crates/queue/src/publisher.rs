use async_trait::async_trait;

use relay_common::types::WebhookMessage;

use crate::error::QueueError;

/// Pushes webhook messages onto a queue for some consumer to deliver.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish(&self, message: &WebhookMessage) -> Result<(), QueueError>;
}
