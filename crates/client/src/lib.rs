//! chatwire client
//!
//! Reconnecting real-time channel for chat-style backends: a WebSocket
//! channel with an outbound queue, heartbeats and typing signals, a
//! read-only SSE fallback stream, and a CSRF-aware REST client.

pub mod backoff;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod manager;
pub mod notify;
pub mod stream;
pub mod transport;
pub mod typing;

pub use backoff::ReconnectBackoff;
pub use channel::RealtimeChannel;
pub use config::{ChannelConfig, ConfigError, QueuePolicy};
pub use dispatch::{HandlerError, HandlerId, HandlerRegistry, HandlerResult};
pub use error::{ApiError, ApiResult};
pub use http::{ApiClient, CsrfToken};
pub use manager::ChannelManager;
pub use notify::{Notifier, ToastKind, TracingNotifier};
pub use stream::EventStream;
pub use transport::{Connector, TransportError, TransportEvent, TransportLink, WireFrame, WsConnector};
pub use typing::{TypingTracker, TypingUser};
