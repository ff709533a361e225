use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use relay_common::types::{DeliveryResult, Notification};

use crate::sender::{DeliveryError, WebhookSender};

/// Sender for local runs: logs the notification and reports success.
///
/// Never opens a connection. The secret is masked in the log output.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingWebhookSender;

impl LoggingWebhookSender {
    pub fn new() -> Self {
        Self
    }
}

/// Render custom headers as `Name: value` pairs, sorted for stable output.
fn describe_headers(notification: &Notification) -> String {
    if notification.headers().is_empty() {
        return "(none)".to_string();
    }

    let mut pairs: Vec<String> = notification
        .headers()
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect();
    pairs.sort();
    pairs.join(", ")
}

#[async_trait]
impl WebhookSender for LoggingWebhookSender {
    async fn send(
        &self,
        notification: &Notification,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult, DeliveryError> {
        if cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled);
        }

        let secret = if notification.secret().is_some() {
            "***"
        } else {
            "(none)"
        };

        tracing::info!(
            notification_id = %notification.id(),
            url = %notification.url(),
            method = %notification.method(),
            content_type = notification.payload().content_type(),
            headers = %describe_headers(notification),
            secret,
            timeout_secs = notification.timeout().as_secs(),
            max_retries = notification.max_retries(),
            payload = notification.payload().content(),
            "Webhook notification (console sender, not sent)"
        );

        Ok(DeliveryResult::succeeded(
            200,
            Some(r#"{"status":"logged"}"#.to_string()),
            Duration::from_millis(1),
        ))
    }
}
