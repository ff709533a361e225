//! Glue between the queue consumer and the webhook sender.
//!
//! A message that fails validation, or whose delivery is cancelled, is an
//! error and gets requeued. A delivery that ran out of retries is reported
//! through its [`DeliveryResult`] and the message is acknowledged.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use relay_common::error::AppError;
use relay_common::types::{DeliveryResult, Notification, WebhookMessage};
use relay_notifier::WebhookSender;
use relay_queue::MessageHandler;

pub struct Dispatcher {
    sender: Arc<dyn WebhookSender>,
}

impl Dispatcher {
    pub fn new(sender: Arc<dyn WebhookSender>) -> Self {
        Self { sender }
    }

    fn log_result(notification: &Notification, result: &DeliveryResult) {
        if result.success {
            tracing::info!(
                notification_id = %notification.id(),
                url = %notification.url(),
                status = result.status_code,
                duration_ms = result.duration.as_millis() as u64,
                "Webhook delivered successfully"
            );
        } else {
            tracing::error!(
                notification_id = %notification.id(),
                url = %notification.url(),
                status = result.status_code,
                error = result.error_message.as_deref().unwrap_or("unknown"),
                duration_ms = result.duration.as_millis() as u64,
                "Webhook delivery failed"
            );
        }
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(
        &self,
        message: WebhookMessage,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let notification = Notification::try_from(message).map_err(AppError::from)?;

        tracing::info!(
            notification_id = %notification.id(),
            url = %notification.url(),
            method = %notification.method(),
            "Processing webhook notification"
        );

        let result = self.sender.send(&notification, cancel).await?;
        Self::log_result(&notification, &result);

        Ok(())
    }
}
