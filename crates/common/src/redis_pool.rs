use redis::Client;
use redis::aio::ConnectionManager;

/// Open a reconnecting Redis connection.
///
/// Logs the server address only; credentials in `redis_url` stay out of logs.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let addr = client.get_connection_info().addr.to_string();
    let manager = ConnectionManager::new(client).await?;

    tracing::info!(addr = %addr, "Connected to Redis");
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_connecting() {
        assert!(create_redis_pool("not-a-redis-url").await.is_err());
        assert!(create_redis_pool("http://localhost:6379").await.is_err());
    }
}
