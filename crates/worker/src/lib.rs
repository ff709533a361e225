pub mod dispatch;
pub mod stdin;

use std::sync::Arc;

use relay_common::config::{AppConfig, SenderKind};
use relay_notifier::{Backoff, HttpWebhookSender, LoggingWebhookSender, WebhookSender};

pub use dispatch::Dispatcher;

/// Build the sender selected by `WEBHOOK_PROVIDER`.
pub fn build_sender(config: &AppConfig) -> anyhow::Result<Arc<dyn WebhookSender>> {
    Ok(match config.webhook_provider {
        SenderKind::Http => Arc::new(HttpWebhookSender::new(
            &config.user_agent,
            Backoff::from_millis(config.retry_delay_ms),
        )?),
        SenderKind::Console => Arc::new(LoggingWebhookSender::new()),
    })
}
