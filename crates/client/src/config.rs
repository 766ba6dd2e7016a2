//! Channel configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use chatwire_shared::ChannelId;
use url::Url;

/// What happens to queued outbound messages on an explicit `disconnect()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Keep them; the next successful connect flushes them
    #[default]
    Preserve,
    /// Drop them
    Clear,
}

impl FromStr for QueuePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preserve" => Ok(QueuePolicy::Preserve),
            "clear" => Ok(QueuePolicy::Clear),
            _ => Err(ConfigError::Invalid(
                "CHATWIRE_QUEUE_POLICY must be `preserve` or `clear`",
            )),
        }
    }
}

/// Real-time channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// HTTP(S) origin of the backend, e.g. `https://app.example.org`
    pub origin: Url,
    /// Resource segment of the WebSocket path: `/ws/<resource>/<channel>/`
    pub resource: String,
    /// Resource segment of the SSE path: `/<stream_resource>/stream/`
    pub stream_resource: String,

    // Reconnect
    pub base_delay: Duration,
    pub max_attempts: u32,
    pub jitter: bool,

    // Keep-alive
    pub heartbeat_interval: Duration,

    // Typing indicators
    pub typing_timeout: Duration,
    /// Own user id; typing signals from it are ignored
    pub user_id: Option<String>,

    pub queue_policy: QueuePolicy,

    // CSRF / session
    pub csrf_token: Option<String>,
    /// Raw `Cookie` header forwarded on HTTP and WebSocket requests
    pub cookie: Option<String>,

    /// Open the SSE stream once the WebSocket channel has failed
    pub sse_fallback: bool,
}

impl ChannelConfig {
    /// Configuration with defaults for everything but the origin
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            resource: "chat".to_string(),
            stream_resource: "notifications".to_string(),
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
            jitter: false,
            heartbeat_interval: Duration::from_secs(30),
            typing_timeout: Duration::from_millis(3000),
            user_id: None,
            queue_policy: QueuePolicy::Preserve,
            csrf_token: None,
            cookie: None,
            sse_fallback: true,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let origin = env::var("CHATWIRE_ORIGIN").map_err(|_| ConfigError::Missing("CHATWIRE_ORIGIN"))?;
        let origin = Url::parse(&origin)
            .map_err(|e| ConfigError::InvalidUrl(format!("CHATWIRE_ORIGIN: {}", e)))?;

        let config = Self {
            origin,
            resource: env::var("CHATWIRE_RESOURCE").unwrap_or_else(|_| "chat".to_string()),
            stream_resource: env::var("CHATWIRE_STREAM_RESOURCE")
                .unwrap_or_else(|_| "notifications".to_string()),

            // Reconnect
            base_delay: Duration::from_millis(
                env::var("CHATWIRE_BASE_DELAY_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000),
            ),
            max_attempts: env::var("CHATWIRE_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            jitter: env::var("CHATWIRE_JITTER")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),

            // Keep-alive
            heartbeat_interval: Duration::from_secs(
                env::var("CHATWIRE_HEARTBEAT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            ),

            // Typing indicators
            typing_timeout: Duration::from_millis(
                env::var("CHATWIRE_TYPING_TIMEOUT_MS")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            ),
            user_id: env::var("CHATWIRE_USER_ID").ok().filter(|v| !v.is_empty()),

            queue_policy: match env::var("CHATWIRE_QUEUE_POLICY") {
                Ok(raw) => raw.parse()?,
                Err(_) => QueuePolicy::default(),
            },

            // CSRF / session
            csrf_token: env::var("CHATWIRE_CSRF_TOKEN").ok().filter(|v| !v.is_empty()),
            cookie: env::var("CHATWIRE_COOKIE").ok().filter(|v| !v.is_empty()),

            sse_fallback: env::var("CHATWIRE_SSE_FALLBACK")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        };

        if config.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "CHATWIRE_HEARTBEAT_SECS must be greater than zero",
            ));
        }

        Ok(config)
    }

    /// WebSocket URL for a channel: `ws(s)://<host>/ws/<resource>/<channel>/`
    pub fn channel_url(&self, channel_id: &ChannelId) -> Result<Url, ConfigError> {
        if channel_id.as_str().is_empty() {
            return Err(ConfigError::InvalidUrl("empty channel id".to_string()));
        }

        let scheme = match self.origin.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ConfigError::InvalidUrl(format!(
                    "unsupported origin scheme `{}`",
                    other
                )))
            }
        };

        let mut url = self.origin.clone();
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::InvalidUrl(format!("cannot switch origin to {}", scheme)))?;
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| ConfigError::InvalidUrl("origin cannot be a base URL".to_string()))?
            .pop_if_empty()
            .push("ws")
            .push(&self.resource)
            .push(channel_id.as_str())
            .push("");

        Ok(url)
    }

    /// SSE fallback URL: `<origin>/<stream_resource>/stream/`
    pub fn stream_url(&self) -> Result<Url, ConfigError> {
        self.http_url(&format!("/{}/stream/", self.stream_resource))
    }

    /// Absolute HTTP URL for a path on the origin
    pub fn http_url(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin
            .join(path)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", path, e)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}
