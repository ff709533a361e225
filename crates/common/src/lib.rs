//! Shared model, configuration and error types for the webhook relay.

pub mod config;
pub mod error;
pub mod redis_pool;
pub mod types;
