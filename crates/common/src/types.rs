use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::ValidationError;

/// Content type used when a message does not name one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Retries after the first attempt when a message does not set `maxRetries`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-attempt timeout when a message does not set `timeoutSeconds`.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// HTTP methods a webhook may be delivered with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
    Patch,
}

impl HttpMethod {
    /// Map a method name to a variant, ignoring case.
    ///
    /// Total: anything that is not PUT or PATCH becomes POST.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            _ => HttpMethod::Post,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An absolute http(s) URL, kept exactly as it was supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookUrl(String);

impl WebhookUrl {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::EmptyUrl);
        }

        let parsed = Url::parse(value).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;

        match parsed.scheme() {
            "http" | "https" => Ok(Self(value.to_string())),
            other => Err(ValidationError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WebhookUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request body plus the content type it is sent with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookPayload {
    content: String,
    content_type: String,
}

impl WebhookPayload {
    pub fn new(content: String, content_type: Option<String>) -> Result<Self, ValidationError> {
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyPayload);
        }

        let content_type = content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        Ok(Self {
            content,
            content_type,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

/// Raw fields for [`Notification::create`].
///
/// Optional fields fall back to the documented defaults.
#[derive(Debug, Clone, Default)]
pub struct NewNotification {
    pub id: Uuid,
    pub url: String,
    pub method: Option<String>,
    pub content: String,
    pub content_type: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub secret: Option<String>,
    pub max_retries: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

/// One validated webhook delivery request.
///
/// The only way to obtain one is [`Notification::create`] (or the
/// `TryFrom<WebhookMessage>` impl built on it), so every instance is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    id: Uuid,
    url: WebhookUrl,
    method: HttpMethod,
    payload: WebhookPayload,
    headers: HashMap<String, String>,
    secret: Option<String>,
    max_retries: u32,
    timeout: Duration,
    created_at: DateTime<Utc>,
}

impl Notification {
    pub fn create(params: NewNotification) -> Result<Self, ValidationError> {
        let url = WebhookUrl::parse(&params.url)?;
        let payload = WebhookPayload::new(params.content, params.content_type)?;

        let timeout_seconds = params.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        if timeout_seconds == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        Ok(Self {
            id: params.id,
            url,
            method: params
                .method
                .as_deref()
                .map(HttpMethod::parse_lenient)
                .unwrap_or_default(),
            payload,
            headers: params.headers.unwrap_or_default(),
            secret: params.secret.filter(|s| !s.is_empty()),
            max_retries: params.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            timeout: Duration::from_secs(timeout_seconds),
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &WebhookUrl {
        &self.url
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn payload(&self) -> &WebhookPayload {
        &self.payload
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Deadline for a single attempt.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Queue message payload, as published by producers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMessage {
    pub notification_id: Uuid,
    pub webhook_url: String,
    #[serde(default = "default_http_method")]
    pub http_method: String,
    pub payload: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl WebhookMessage {
    /// Message with every optional field at its default.
    pub fn new(
        notification_id: Uuid,
        webhook_url: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            notification_id,
            webhook_url: webhook_url.into(),
            http_method: default_http_method(),
            payload: payload.into(),
            content_type: default_content_type(),
            headers: None,
            secret: None,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

fn default_http_method() -> String {
    HttpMethod::Post.as_str().to_string()
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl TryFrom<WebhookMessage> for Notification {
    type Error = ValidationError;

    fn try_from(message: WebhookMessage) -> Result<Self, Self::Error> {
        Notification::create(NewNotification {
            id: message.notification_id,
            url: message.webhook_url,
            method: Some(message.http_method),
            content: message.payload,
            content_type: Some(message.content_type),
            headers: message.headers,
            secret: message.secret,
            max_retries: Some(message.max_retries),
            timeout_seconds: Some(message.timeout_seconds),
        })
    }
}

/// Outcome of delivering one notification, retries included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub success: bool,
    /// Last HTTP status observed, 0 if no response was ever received.
    pub status_code: u16,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration: Duration,
}

impl DeliveryResult {
    pub fn succeeded(status_code: u16, response_body: Option<String>, duration: Duration) -> Self {
        Self {
            success: true,
            status_code,
            response_body,
            error_message: None,
            duration,
        }
    }

    pub fn failed(
        status_code: u16,
        response_body: Option<String>,
        error_message: String,
        duration: Duration,
    ) -> Self {
        Self {
            success: false,
            status_code,
            response_body,
            error_message: Some(error_message),
            duration,
        }
    }
}
