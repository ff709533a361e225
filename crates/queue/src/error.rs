use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Consumer already started")]
    AlreadyStarted,

    #[error("Consumer is stopped")]
    Closed,
}
