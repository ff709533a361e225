//! Push a single webhook message onto the configured Redis queue.
//!
//! ## Usage
//!
//! ```bash
//! # Test payload, default POST
//! cargo run --bin relay-publish -- https://webhook.site/your-id
//!
//! # Signed PUT with a custom payload and header
//! cargo run --bin relay-publish -- https://example.com/hook \
//!     --method PUT --payload '{"event":"order.created"}' \
//!     --secret my-webhook-secret --header X-Tenant=acme
//! ```
//!
//! `REDIS_URL` and `QUEUE_NAME` are read from the environment like the worker.

use std::collections::HashMap;

use chrono::Utc;
use clap::Parser;
use uuid::Uuid;

use relay_common::config::AppConfig;
use relay_common::redis_pool::create_redis_pool;
use relay_common::types::{HttpMethod, WebhookMessage, WebhookUrl};
use relay_queue::{QueuePublisher, RedisPublisher};

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish a webhook message for the relay worker")]
struct Args {
    /// Webhook URL to deliver to
    url: String,

    /// HTTP method (POST, PUT or PATCH)
    #[arg(short, long, default_value = "POST")]
    method: String,

    /// Request body; a test event is generated when omitted
    #[arg(short, long)]
    payload: Option<String>,

    /// Content type of the payload
    #[arg(long, default_value = "application/json")]
    content_type: String,

    /// Secret used to sign the body (HMAC-SHA256)
    #[arg(short, long, env = "WEBHOOK_SECRET")]
    secret: Option<String>,

    /// Extra header as NAME=VALUE, repeatable
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Retries after the first attempt
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Per-attempt timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_seconds: u64,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("header must be NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name is empty in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn test_payload(notification_id: Uuid) -> String {
    serde_json::json!({
        "event": "test.webhook",
        "timestamp": Utc::now().to_rfc3339(),
        "notificationId": notification_id,
        "data": {
            "message": "Test webhook from relay-publish",
        },
    })
    .to_string()
}

fn build_message(args: Args) -> anyhow::Result<WebhookMessage> {
    // Fail here rather than have the worker requeue it forever.
    WebhookUrl::parse(&args.url)?;

    let notification_id = Uuid::new_v4();
    let mut headers: HashMap<String, String> = args.headers.into_iter().collect();
    headers.insert("X-Custom-Header".to_string(), "relay-publish".to_string());

    let mut message = WebhookMessage::new(
        notification_id,
        args.url,
        args.payload.unwrap_or_else(|| test_payload(notification_id)),
    );
    message.http_method = HttpMethod::parse_lenient(&args.method).as_str().to_string();
    message.content_type = args.content_type;
    message.headers = Some(headers);
    message.secret = args.secret.filter(|s| !s.is_empty());
    message.max_retries = args.max_retries;
    message.timeout_seconds = args.timeout_seconds;

    Ok(message)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_publish=info,relay_queue=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env()?;
    let message = build_message(args)?;

    let conn = create_redis_pool(&config.redis_url).await?;
    RedisPublisher::new(conn, &config.queue_name)
        .publish(&message)
        .await?;

    tracing::info!(
        notification_id = %message.notification_id,
        url = %message.webhook_url,
        method = %message.http_method,
        queue = %config.queue_name,
        signed = message.secret.is_some(),
        "Webhook message published"
    );
    Ok(())
}
