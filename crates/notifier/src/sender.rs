use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use relay_common::types::{DeliveryResult, Notification};

/// Reasons `send` returns without producing a [`DeliveryResult`].
///
/// Failed HTTP attempts are not errors; they end up in a failed result.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The caller cancelled the delivery. No further attempts were made.
    #[error("Delivery cancelled by caller")]
    Cancelled,

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Something that can push a notification to its target.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(
        &self,
        notification: &Notification,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult, DeliveryError>;
}
