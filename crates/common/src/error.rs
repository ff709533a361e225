use thiserror::Error;

/// Reasons a notification cannot be constructed.
///
/// These are never retried by the delivery engine: a notification that fails
/// validation is never sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Webhook URL cannot be empty")]
    EmptyUrl,

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    #[error("URL must use HTTP or HTTPS, got scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("Payload content cannot be empty")]
    EmptyPayload,

    #[error("Timeout must be a positive number of seconds")]
    InvalidTimeout,
}

/// Reasons a queue message cannot be turned into a notification.
///
/// Redelivering the same message never fixes these.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
