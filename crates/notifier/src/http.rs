//! HTTP delivery engine.
//!
//! One call to [`HttpWebhookSender::send`] runs up to `max_retries + 1`
//! strictly sequential attempts against the notification's URL:
//!
//! ```text
//! attempt 0 ── fail ── sleep(base) ── attempt 1 ── fail ── sleep(2*base) ── attempt 2 ...
//!     └─ 2xx → success                   └─ 2xx → success
//! ```
//!
//! Each attempt is bounded by the notification's timeout. A timed-out,
//! non-2xx or connection-failed attempt is transient and retried. The
//! caller's cancellation token wins over everything: it aborts the current
//! attempt or backoff sleep and no result is produced.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;

use relay_common::types::{DEFAULT_CONTENT_TYPE, DeliveryResult, HttpMethod, Notification};

use crate::backoff::Backoff;
use crate::sender::{DeliveryError, WebhookSender};
use crate::signing;

/// Response bodies are kept up to this many bytes.
const MAX_BODY_SIZE: usize = 64 * 1024;

const SIGNATURE: HeaderName = HeaderName::from_static("x-webhook-signature");
const NOTIFICATION_ID: HeaderName = HeaderName::from_static("x-notification-id");

/// What a single attempt observed.
#[derive(Debug)]
enum AttemptOutcome {
    Response { status: u16, body: String },
    Failed { status: Option<u16>, error: String },
    TimedOut,
}

/// Webhook sender that performs real HTTP delivery with retries.
///
/// Cheap to share: the underlying `reqwest::Client` pools connections and is
/// safe to use from many tasks at once.
#[derive(Debug, Clone)]
pub struct HttpWebhookSender {
    client: Client,
    backoff: Backoff,
}

impl HttpWebhookSender {
    pub fn new(user_agent: &str, backoff: Backoff) -> Result<Self, DeliveryError> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self::with_client(client, backoff))
    }

    pub fn with_client(client: Client, backoff: Backoff) -> Self {
        Self { client, backoff }
    }

    /// Build the outbound request for one attempt.
    ///
    /// Header order: content type, custom headers, signature, notification id.
    /// Later inserts replace earlier ones with the same name.
    fn build_request(&self, notification: &Notification) -> reqwest::RequestBuilder {
        let payload = notification.payload();
        let mut headers = HeaderMap::new();

        let content_type = HeaderValue::from_str(payload.content_type()).unwrap_or_else(|_| {
            tracing::warn!(
                notification_id = %notification.id(),
                content_type = payload.content_type(),
                "Invalid content type, falling back to default"
            );
            HeaderValue::from_static(DEFAULT_CONTENT_TYPE)
        });
        headers.insert(CONTENT_TYPE, content_type);

        for (name, value) in notification.headers() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => {
                    tracing::warn!(
                        notification_id = %notification.id(),
                        header = %name,
                        "Skipping invalid custom header"
                    );
                }
            }
        }

        if let Some(secret) = notification.secret() {
            match signing::signature_header_value(secret, payload.content().as_bytes())
                .and_then(|sig| HeaderValue::from_str(&sig).ok())
            {
                Some(value) => {
                    headers.insert(SIGNATURE, value);
                }
                None => {
                    tracing::warn!(
                        notification_id = %notification.id(),
                        "Failed to sign webhook payload"
                    );
                }
            }
        }

        if let Ok(value) = HeaderValue::from_str(&notification.id().to_string()) {
            headers.insert(NOTIFICATION_ID, value);
        }

        self.client
            .request(method_for(notification.method()), notification.url().as_str())
            .headers(headers)
            .body(payload.content().to_string())
    }

    /// Send one request and read its body.
    async fn attempt(&self, notification: &Notification) -> AttemptOutcome {
        let response = match self.build_request(notification).send().await {
            Ok(response) => response,
            Err(e) => {
                return AttemptOutcome::Failed {
                    status: None,
                    error: e.to_string(),
                };
            }
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(bytes) => AttemptOutcome::Response {
                status,
                body: String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_BODY_SIZE)])
                    .into_owned(),
            },
            Err(e) => AttemptOutcome::Failed {
                status: Some(status),
                error: format!("Failed to read response body: {e}"),
            },
        }
    }
}

/// Map the notification method onto the HTTP client's method type.
fn method_for(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(
        &self,
        notification: &Notification,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult, DeliveryError> {
        let started = Instant::now();
        let max_retries = notification.max_retries();
        let mut last_status = 0u16;
        let mut last_body: Option<String> = None;
        let mut last_error: Option<String> = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = self.backoff.delay_before(attempt);
                tracing::info!(
                    notification_id = %notification.id(),
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying webhook"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::info!(
                            notification_id = %notification.id(),
                            attempt,
                            "Delivery cancelled during backoff"
                        );
                        return Err(DeliveryError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(
                        notification_id = %notification.id(),
                        attempt,
                        "Delivery cancelled during attempt"
                    );
                    return Err(DeliveryError::Cancelled);
                }
                result = tokio::time::timeout(notification.timeout(), self.attempt(notification)) => {
                    result.unwrap_or(AttemptOutcome::TimedOut)
                }
            };

            match outcome {
                AttemptOutcome::Response { status, body } if (200..300).contains(&status) => {
                    let elapsed = started.elapsed();
                    tracing::debug!(
                        notification_id = %notification.id(),
                        attempt,
                        status,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Webhook delivered"
                    );
                    return Ok(DeliveryResult::succeeded(status, Some(body), elapsed));
                }
                AttemptOutcome::Response { status, body } => {
                    tracing::warn!(
                        notification_id = %notification.id(),
                        attempt,
                        status,
                        "Webhook returned non-success status"
                    );
                    last_status = status;
                    last_body = Some(body);
                }
                AttemptOutcome::Failed { status, error } => {
                    tracing::warn!(
                        notification_id = %notification.id(),
                        attempt,
                        error = %error,
                        "Webhook request failed"
                    );
                    if let Some(status) = status {
                        last_status = status;
                    }
                    last_error = Some(error);
                }
                AttemptOutcome::TimedOut => {
                    let secs = notification.timeout().as_secs();
                    tracing::warn!(
                        notification_id = %notification.id(),
                        attempt,
                        timeout_secs = secs,
                        "Webhook timed out"
                    );
                    last_error = Some(format!("Request timed out after {secs}s"));
                }
            }
        }

        let attempts = u64::from(max_retries) + 1;
        Ok(DeliveryResult::failed(
            last_status,
            last_body,
            last_error.unwrap_or_else(|| format!("Failed after {attempts} attempts")),
            started.elapsed(),
        ))
    }
}
