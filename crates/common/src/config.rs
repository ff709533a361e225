use std::str::FromStr;

/// Message transport the worker consumes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// Redis list queue with a per-consumer processing list.
    #[default]
    Redis,
    /// In-process channel queue, fed from stdin by the worker binary.
    Memory,
}

impl FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(TransportKind::Redis),
            "memory" | "inmemory" | "in-memory" => Ok(TransportKind::Memory),
            other => Err(anyhow::anyhow!(
                "MESSAGING_PROVIDER must be 'redis' or 'memory', got '{}'",
                other
            )),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Redis => write!(f, "redis"),
            TransportKind::Memory => write!(f, "memory"),
        }
    }
}

/// How notifications are sent once decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SenderKind {
    /// Real HTTP delivery with retries.
    #[default]
    Http,
    /// Log the notification and report success without a network call.
    Console,
}

impl FromStr for SenderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(SenderKind::Http),
            "console" => Ok(SenderKind::Console),
            other => Err(anyhow::anyhow!(
                "WEBHOOK_PROVIDER must be 'http' or 'console', got '{}'",
                other
            )),
        }
    }
}

impl std::fmt::Display for SenderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderKind::Http => write!(f, "http"),
            SenderKind::Console => write!(f, "console"),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Which message transport to consume from (default: redis)
    pub messaging_provider: TransportKind,

    /// Redis connection string
    pub redis_url: String,

    /// Queue (Redis list key) holding pending webhook messages
    pub queue_name: String,

    /// Name of this consumer instance; keys its processing list
    pub consumer_name: String,

    /// Which webhook sender to use (default: http)
    pub webhook_provider: SenderKind,

    /// Base delay before the first retry, doubled for each later retry
    pub retry_delay_ms: u64,

    /// User-Agent header sent with every webhook request
    pub user_agent: String,

    /// How long to wait for an in-flight delivery on shutdown before cancelling it
    pub shutdown_grace_seconds: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            messaging_provider: lookup("MESSAGING_PROVIDER")
                .map(|v| v.parse::<TransportKind>())
                .transpose()?
                .unwrap_or_default(),
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            queue_name: lookup("QUEUE_NAME")
                .unwrap_or_else(|| "notifications.webhook".to_string()),
            consumer_name: lookup("CONSUMER_NAME").unwrap_or_else(|| "worker-1".to_string()),
            webhook_provider: lookup("WEBHOOK_PROVIDER")
                .map(|v| v.parse::<SenderKind>())
                .transpose()?
                .unwrap_or_default(),
            retry_delay_ms: lookup("WEBHOOK_RETRY_DELAY_MS")
                .unwrap_or_else(|| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WEBHOOK_RETRY_DELAY_MS must be a valid u64"))?,
            user_agent: lookup("WEBHOOK_USER_AGENT")
                .unwrap_or_else(|| format!("webhook-relay/{}", env!("CARGO_PKG_VERSION"))),
            shutdown_grace_seconds: lookup("SHUTDOWN_GRACE_SECONDS")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SHUTDOWN_GRACE_SECONDS must be a valid u64"))?,
        })
    }
}
