pub mod consumer;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod redis_queue;

pub use consumer::{MessageConsumer, MessageHandler, QueueConsumer, Settlement, Transport};
pub use error::QueueError;
pub use memory::InMemoryQueue;
pub use publisher::QueuePublisher;
pub use redis_queue::{RedisPublisher, RedisTransport};
